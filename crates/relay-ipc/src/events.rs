//! Events published by relay sessions.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{SessionId, StatusSignal};

/// Events a session publishes to its host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RelayEvent {
    /// Session state has changed.
    StateChanged {
        session: SessionId,

        /// Previous state.
        previous: SessionState,

        /// Current state.
        current: SessionState,
    },

    /// Updated status indicator for display.
    Status {
        session: SessionId,
        status: StatusSignal,
    },

    /// A failure was recorded for the session.
    Error {
        session: SessionId,
        message: String,
    },
}

impl RelayEvent {
    /// The session this event belongs to.
    pub fn session(&self) -> &SessionId {
        match self {
            Self::StateChanged { session, .. }
            | Self::Status { session, .. }
            | Self::Error { session, .. } => session,
        }
    }
}
