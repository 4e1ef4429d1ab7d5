//! Session state machine.
//!
//! ```text
//! Dialing ──► Ready ◄──► Querying | Executing | Batching
//!                 any failure ──► Errored (terminal)
//! ```
//!
//! A session is only handed back to the pool for reuse while `Ready`. A
//! future or result stream dropped halfway leaves the session in its busy
//! state, which the pool treats like `Errored`.

use std::fmt;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connecting and handshaking.
    Dialing,
    /// Idle and usable.
    Ready,
    /// Streaming the result of a query.
    Querying,
    /// Running a statement without a result stream.
    Executing,
    /// Inside an insert started by `prepare_batch`.
    Batching,
    /// Failed; the transport must be closed.
    Errored,
}

impl SessionState {
    /// Whether a new operation may start.
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Whether an operation is in progress.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Querying | Self::Executing | Self::Batching)
    }

    /// Whether the state can be left only by closing the session.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Errored
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dialing => "dialing",
            Self::Ready => "ready",
            Self::Querying => "querying",
            Self::Executing => "executing",
            Self::Batching => "batching",
            Self::Errored => "errored",
        })
    }
}
