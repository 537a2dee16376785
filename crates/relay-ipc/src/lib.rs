//! Typed commands, events and state for RTSP relay sessions.
//!
//! This crate defines the vocabulary shared between the relay engine and
//! whatever hosts it: the commands a session accepts, the states it moves
//! through, and the events it publishes.

mod commands;
mod events;
mod state;
mod types;

pub use commands::{SessionCommand, UnknownCommand};
pub use events::RelayEvent;
pub use state::{FailureKind, SessionState, StopReason};
pub use types::{
    Indicator, IndicatorFill, IndicatorShape, SessionConfig, SessionId, SessionMetrics,
    StartOverrides, StatusSignal, DEFAULT_QUALITY, DEFAULT_SUBPROCESS,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (sessions → host).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<RelayEvent>, Receiver<RelayEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
