//! Segmented stream relay.
//!
//! Turns a chain of length-bounded generation segments into one ordered
//! output stream. [`start_relay`] requests the first segment and hands the
//! [`OutputChannel`] to a [`ContinuationController`], which keeps asking the
//! [`GenerationBackend`] for continuations while segments end on `length`
//! and the [`SegmentCounter`] budget allows it.

pub mod channel;
pub mod controller;
pub mod counter;
pub mod error;
pub mod segment;
pub mod session;

#[cfg(test)]
mod tests;

pub use channel::{ChannelState, OutputChannel, RelayItem, RelayStream, SegmentFinish, SegmentOutcome};
pub use controller::{decide, ContinuationController, ControllerState, Decision, RelayReport};
pub use counter::SegmentCounter;
pub use error::{BackendError, RelayError};
pub use segment::{FinishReason, GenerationBackend, SegmentEvent, SegmentSource, SegmentWriter};
pub use session::{join_controller, start_relay, RelayHandle, RelaySettings};
