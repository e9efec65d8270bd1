//! segrelay relays streaming chat completions past a provider's output
//! token limit.
//!
//! The crate is organized in a few layers:
//! - [`core::relay`] owns the segmented stream relay: the output channel a
//!   consumer reads, the continuation controller that decides when a
//!   truncated segment is continued, and the segment budget.
//! - [`core`] also holds provider/credential resolution, configuration and
//!   the SSE chat-completions backend.
//! - [`server`] exposes the relay over HTTP; [`cli`] wires everything into
//!   the `segrelay` binary.
//! - [`api`] defines the chat payloads sent to providers.

pub mod api;
pub mod auth;
pub mod cli;
pub mod core;
pub mod server;
pub mod utils;
