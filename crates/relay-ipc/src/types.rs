//! Common types used across sessions and their hosts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default transcoder executable, resolved through `PATH`.
pub const DEFAULT_SUBPROCESS: &str = "ffmpeg";

/// Default JPEG quality passed to the transcoder (`-q:v`).
pub const DEFAULT_QUALITY: u8 = 5;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Connection settings for one camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Camera address, `host[:port][/path]`, without scheme.
    #[serde(default)]
    pub address: Option<String>,

    /// RTSP username.
    #[serde(default)]
    pub username: Option<String>,

    /// RTSP password.
    #[serde(default)]
    pub password: Option<String>,

    /// Extra input arguments placed before `-i`.
    #[serde(default)]
    pub transport_args: Vec<String>,

    /// Transcoder executable (default: `ffmpeg`).
    #[serde(default = "default_subprocess")]
    pub subprocess_path: String,

    /// JPEG quality, 2 (best) to 31 (worst).
    #[serde(default = "default_quality")]
    pub quality: u8,
}

fn default_subprocess() -> String {
    DEFAULT_SUBPROCESS.to_string()
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: None,
            username: None,
            password: None,
            transport_args: Vec::new(),
            subprocess_path: default_subprocess(),
            quality: DEFAULT_QUALITY,
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Set username and password.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Resolve per-call overrides against these defaults.
    ///
    /// The stored configuration is left untouched; each overridden field
    /// replaces the default only for the returned copy.
    pub fn with_overrides(&self, overrides: &StartOverrides) -> SessionConfig {
        let mut resolved = self.clone();
        if overrides.address.is_some() {
            resolved.address = overrides.address.clone();
        }
        if overrides.username.is_some() {
            resolved.username = overrides.username.clone();
        }
        if overrides.password.is_some() {
            resolved.password = overrides.password.clone();
        }
        resolved
    }

    /// The address, if set and non-empty.
    pub fn address(&self) -> Option<&str> {
        non_empty(&self.address)
    }

    /// The username, if set and non-empty.
    pub fn username(&self) -> Option<&str> {
        non_empty(&self.username)
    }

    /// The password, if set and non-empty.
    pub fn password(&self) -> Option<&str> {
        non_empty(&self.password)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Fields a `start` may override for a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOverrides {
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Relay counters for one stream run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Frames written to the sink.
    pub frames_delivered: u64,

    /// Payload bytes written to the sink (excluding part headers).
    pub bytes_delivered: u64,

    /// Frames drained while paused.
    pub frames_discarded: u64,

    /// Frames dropped because the consumer queue was full.
    pub frames_dropped: u64,

    /// Seconds since the subprocess was spawned.
    pub uptime_seconds: u64,
}

/// Indicator colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorFill {
    Grey,
    Blue,
    Green,
    Yellow,
    Red,
}

/// Indicator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorShape {
    Ring,
    Dot,
}

/// Visual status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicator {
    pub fill: IndicatorFill,
    pub shape: IndicatorShape,
}

/// Observable status of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSignal {
    pub indicator: Indicator,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_do_not_mutate_defaults() {
        let defaults = SessionConfig::new("cam.local:554").with_credentials("admin", "secret");
        let overrides = StartOverrides {
            address: Some("other.local".to_string()),
            ..Default::default()
        };

        let resolved = defaults.with_overrides(&overrides);

        assert_eq!(resolved.address(), Some("other.local"));
        assert_eq!(resolved.username(), Some("admin"));
        assert_eq!(defaults.address(), Some("cam.local:554"));
    }

    #[test]
    fn test_blank_fields_count_as_missing() {
        let config = SessionConfig {
            address: Some("  ".to_string()),
            username: Some(String::new()),
            ..Default::default()
        };

        assert_eq!(config.address(), None);
        assert_eq!(config.username(), None);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "address": "cam.local:554" }"#).unwrap();

        assert_eq!(config.subprocess_path, DEFAULT_SUBPROCESS);
        assert_eq!(config.quality, DEFAULT_QUALITY);
        assert!(config.transport_args.is_empty());
    }
}
