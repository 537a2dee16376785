//! Relay configuration file.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use relay_engine::{SessionMode, SessionOptions};
use relay_ipc::{SessionConfig, SessionId, DEFAULT_SUBPROCESS};

/// Environment variable overriding the default transcoder path.
pub const SUBPROCESS_ENV: &str = "RTSP_RELAY_FFMPEG";

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1880))
}

fn default_mode() -> SessionMode {
    SessionMode::Direct
}

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

/// One camera session.
#[derive(Debug, Deserialize)]
pub struct SessionEntry {
    pub id: SessionId,

    #[serde(default = "default_mode")]
    pub mode: SessionMode,

    #[serde(flatten)]
    pub config: SessionConfig,

    /// Overrides the mode's SIGTERM-to-SIGKILL window.
    #[serde(default)]
    pub grace_ms: Option<u64>,
}

impl SessionEntry {
    pub fn options(&self) -> SessionOptions {
        let options = SessionOptions::new(self.mode);
        match self.grace_ms {
            Some(ms) => options.with_grace(Duration::from_millis(ms)),
            None => options,
        }
    }
}

impl RelayConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_subprocess_override(std::env::var(SUBPROCESS_ENV).ok());
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;

        let mut seen = HashSet::new();
        for entry in &config.sessions {
            if !seen.insert(entry.id.clone()) {
                bail!("Duplicate session id '{}'", entry.id);
            }
        }

        Ok(config)
    }

    /// Use `path` for sessions that kept the default transcoder.
    pub fn apply_subprocess_override(&mut self, path: Option<String>) {
        let Some(path) = path.filter(|p| !p.trim().is_empty()) else {
            return;
        };

        for entry in &mut self.sessions {
            if entry.config.subprocess_path == DEFAULT_SUBPROCESS {
                entry.config.subprocess_path = path.clone();
            }
        }
    }
}
