//! Session state machine types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The current state of a relay session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No subprocess is running.
    #[default]
    Stopped,

    /// Subprocess spawned, waiting for the first output chunk.
    Starting,

    /// Output is being delivered to the sink.
    Streaming,

    /// Output is drained but not delivered.
    Paused,

    /// Termination was requested, waiting for the subprocess to exit.
    Stopping,

    /// The last attempt failed.
    Error,
}

impl SessionState {
    /// Returns true if the session is stopped.
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true while a started stream has not yet ended.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Streaming | Self::Paused)
    }

    /// Returns true if the session is stopping.
    pub fn is_stopping(self) -> bool {
        matches!(self, Self::Stopping)
    }

    /// Returns true if the session is in an error state.
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns true if a new `start` may be accepted from this state.
    pub fn accepts_start(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Stopped, Starting) | (Error, Starting) => true,
            (Starting, Streaming) => true,
            (Streaming, Paused) | (Paused, Streaming) => true,
            (Starting | Streaming | Paused, Stopping) => true,
            (Starting | Streaming | Paused, Error) => true,
            (Starting | Streaming | Paused, Stopped) => true,
            (Stopping, Stopped) => true,
            // A failed session still holding a subprocess can be stopped.
            (Error, Stopping) | (Error, Stopped) => true,
            _ => false,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection failures recognized in the subprocess diagnostic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The camera refused the connection.
    ConnectionRefused,

    /// Credentials were rejected or the stream could not be parsed.
    AuthOrInvalidStream,

    /// No route to the camera host.
    HostUnreachable,
}

impl FailureKind {
    /// Short label for status display.
    pub fn label(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "Connection refused",
            Self::AuthOrInvalidStream => "Authentication/URL",
            Self::HostUnreachable => "Host not found",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reason for stopping a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A `stop` command was received.
    UserRequested,

    /// The output consumer went away.
    ClientDisconnected,

    /// The owning handler is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::UserRequested => "stop requested",
            Self::ClientDisconnected => "client disconnected",
            Self::Shutdown => "handler shutting down",
        }
    }
}
