//! Error types for relay sessions.

use thiserror::Error;

use relay_ipc::{FailureKind, SessionId, UnknownCommand};
use relay_process::{ProcessError, ProcessExit};

/// Errors surfaced by relay sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Missing or invalid target address or credentials.
    #[error("Configuration error: {0}")]
    Config(#[source] ProcessError),

    /// The transcoder could not be launched.
    #[error("Failed to start transcoder: {0}")]
    Spawn(#[source] ProcessError),

    /// Fatal pattern recognized in the diagnostic stream.
    #[error("Connection error: {0}")]
    Connection(FailureKind),

    /// The transcoder died without being asked to.
    #[error("Transcoder exited unexpectedly ({0})")]
    UnexpectedExit(ProcessExit),

    /// The output consumer closed or errored.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// A stream is already running or starting.
    #[error("Stream already active for this session")]
    AlreadyActive,

    /// The session actor is gone.
    #[error("Session {0} is closed")]
    Closed(SessionId),

    /// No session registered under this id.
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// HTTP sessions start when a client requests the stream.
    #[error("Session {0} is started by requesting its stream")]
    NotDirect(SessionId),

    /// Command name not recognized.
    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),
}

impl From<ProcessError> for SessionError {
    fn from(err: ProcessError) -> Self {
        if err.is_config() {
            Self::Config(err)
        } else {
            Self::Spawn(err)
        }
    }
}

impl SessionError {
    /// Short message for status display.
    pub fn summary(&self) -> String {
        match self {
            Self::Connection(kind) => kind.label().to_string(),
            Self::UnexpectedExit(exit) => format!("Transcoder exited ({exit})"),
            other => other.to_string(),
        }
    }
}
