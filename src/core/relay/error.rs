use std::error::Error as StdError;
use std::fmt;

use super::channel::ChannelState;

/// A failure reported by the generation backend, either while a segment
/// was being requested or while it was producing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    message: String,
    status: Option<u16>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status returned by the provider, when the failure came from one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "backend error (HTTP {status}): {}", self.message),
            None => write!(f, "backend error: {}", self.message),
        }
    }
}

impl StdError for BackendError {}

/// Terminal failures of a relay session.
///
/// Every variant reaches the consumer as the final item of its stream;
/// the relay never retries on its own beyond the bounded continuation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The backend failed to start or finish a segment.
    Backend(BackendError),

    /// A segment was still truncated after the last permitted continuation.
    SegmentBudgetExceeded { max_segments: u32, switches: u32 },

    /// A channel operation was attempted outside the `Open` state.
    InvalidState {
        operation: &'static str,
        state: ChannelState,
    },

    /// The provider stopped the segment for a policy reason.
    ContentFiltered { reason: String },

    /// The consumer disconnected or cancelled the session.
    Cancelled,
}

impl RelayError {
    pub fn invalid_state(operation: &'static str, state: ChannelState) -> Self {
        RelayError::InvalidState { operation, state }
    }

    /// True when the failure happened because nobody is listening anymore.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled)
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Backend(err) => write!(f, "{err}"),
            RelayError::SegmentBudgetExceeded {
                max_segments,
                switches,
            } => write!(
                f,
                "Cannot continue message: maximum segments reached ({switches} of {max_segments} continuations used)"
            ),
            RelayError::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while the channel is {state}")
            }
            RelayError::ContentFiltered { reason } => {
                write!(f, "response stopped by the provider ({reason})")
            }
            RelayError::Cancelled => write!(f, "relay cancelled by the consumer"),
        }
    }
}

impl StdError for RelayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RelayError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for RelayError {
    fn from(err: BackendError) -> Self {
        RelayError::Backend(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_error_mentions_usage() {
        let err = RelayError::SegmentBudgetExceeded {
            max_segments: 2,
            switches: 2,
        };
        let text = err.to_string();
        assert!(text.contains("maximum segments reached"));
        assert!(text.contains("2 of 2"));
    }

    #[test]
    fn backend_error_exposes_source_and_status() {
        let err = RelayError::from(BackendError::with_status(502, "bad gateway"));
        assert_eq!(err.to_string(), "backend error (HTTP 502): bad gateway");
        assert!(err.source().is_some());
        match err {
            RelayError::Backend(inner) => assert_eq!(inner.status(), Some(502)),
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_state_names_operation_and_state() {
        let err = RelayError::invalid_state("switch source", ChannelState::Closed);
        assert_eq!(err.to_string(), "cannot switch source while the channel is closed");
    }
}
