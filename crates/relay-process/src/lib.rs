//! Transcoder subprocess supervision.
//!
//! This crate builds the RTSP connection target, launches the transcoder
//! with its output and diagnostic streams captured, and enforces
//! graceful-then-forced termination.

mod error;
mod launcher;
mod supervisor;
mod target;

pub use error::ProcessError;
pub use launcher::{CommandSpec, FfmpegLauncher, Launcher};
pub use supervisor::{ProcessExit, ProcessHandle, ProcessId, ProcessSupervisor, SpawnedProcess};
pub use target::RtspTarget;

use std::time::Duration;

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Grace window before a direct session's subprocess is force-killed.
pub const DIRECT_GRACE: Duration = Duration::from_millis(2000);

/// Grace window before an HTTP session's subprocess is force-killed.
pub const HTTP_GRACE: Duration = Duration::from_millis(1500);
