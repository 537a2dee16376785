//! Commands accepted by a relay session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle commands a session understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCommand {
    /// Spawn the subprocess and begin relaying.
    Start,

    /// Terminate the subprocess and release the sink.
    Stop,

    /// Keep draining output but stop delivering it.
    Pause,

    /// Resume delivery after a pause.
    Resume,
}

/// A command name that is not part of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command '{0}', expected start, stop, pause or resume")]
pub struct UnknownCommand(pub String);

impl SessionCommand {
    /// Parse an optional command topic. A missing topic means `start`.
    pub fn from_topic(topic: Option<&str>) -> Result<Self, UnknownCommand> {
        match topic {
            None => Ok(Self::Start),
            Some(topic) => topic.parse(),
        }
    }

    /// Returns the lowercase command name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

impl FromStr for SessionCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("STOP".parse::<SessionCommand>(), Ok(SessionCommand::Stop));
        assert_eq!("Pause".parse::<SessionCommand>(), Ok(SessionCommand::Pause));
        assert_eq!(" resume ".parse::<SessionCommand>(), Ok(SessionCommand::Resume));
    }

    #[test]
    fn test_missing_topic_defaults_to_start() {
        assert_eq!(SessionCommand::from_topic(None), Ok(SessionCommand::Start));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let err = SessionCommand::from_topic(Some("rewind")).unwrap_err();
        assert_eq!(err, UnknownCommand("rewind".to_string()));
    }
}
