//! Error types for test host sessions

use crate::protocol::channel::ChannelError;
use crate::session::state::SessionState;

// ============================================================================
// Session Errors
// ============================================================================

/// Errors surfaced by session operations
///
/// Transport failures inside event loops are folded into degraded results
/// and never show up here; only single-reply exchanges and sends report
/// them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The host speaks a different protocol version; the session is torn down
    #[error("Protocol version mismatch: expected {expected}, host reported {actual}")]
    ProtocolVersionMismatch { expected: i32, actual: i32 },

    /// The requested framework is not in the registry
    #[error("Unknown test framework: {0}")]
    UnknownTestFramework(String),

    /// Reading from or writing to the host failed
    #[error("Transport failure: {0}")]
    Transport(#[from] ChannelError),

    /// Another operation is in flight on this session
    #[error("Session busy: another operation is in flight")]
    SessionBusy,

    /// Operation issued in a state that does not allow it
    #[error("Invalid session state: current={current}, expected={expected}")]
    InvalidState {
        current: SessionState,
        expected: SessionState,
    },

    /// A reply payload did not have the expected shape
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    pub fn invalid_state(current: SessionState, expected: SessionState) -> Self {
        Self::InvalidState { current, expected }
    }

    pub fn decode(what: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { what, source }
    }
}
