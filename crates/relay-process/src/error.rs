//! Error types for the process module.

use thiserror::Error;

/// Errors that can occur while preparing or launching a subprocess.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// No address configured or supplied.
    #[error("RTSP address is not configured")]
    MissingAddress,

    /// Address could not be turned into an RTSP URL.
    #[error("Invalid RTSP address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Credentials could not be attached to the URL.
    #[error("Invalid RTSP credentials: {0}")]
    InvalidCredentials(String),

    /// The executable could not be launched.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A captured pipe was not available after spawning.
    #[error("Subprocess did not expose its {0} pipe")]
    MissingPipe(&'static str),
}

impl ProcessError {
    /// True for errors caused by configuration rather than the launch itself.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingAddress | Self::InvalidAddress { .. } | Self::InvalidCredentials(_)
        )
    }
}
