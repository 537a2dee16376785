//! State-aware forwarding of subprocess output to a sink.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use relay_ipc::SessionState;

use crate::metrics::RelayMetrics;
use crate::sink::{Delivery, OutputSink, SinkError};

/// What happened to one output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Handed to the sink.
    Delivered,

    /// The sink's queue was full.
    Dropped,

    /// Drained while paused.
    Discarded,

    /// Arrived outside a streaming run.
    Ignored,

    /// The consumer is gone; the session must stop.
    SinkClosed,
}

/// Forwards each stdout chunk as one frame unit according to session state.
#[derive(Debug, Clone)]
pub struct FrameRelay {
    metrics: Arc<RelayMetrics>,
}

impl FrameRelay {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self { metrics }
    }

    /// Whether a chunk arriving in `state` marks the start of the stream.
    pub fn begins_stream(state: SessionState) -> bool {
        state == SessionState::Starting
    }

    /// Route one chunk. The caller applies any state transition first.
    pub fn relay(
        &self,
        state: SessionState,
        chunk: Bytes,
        sink: Option<&mut (dyn OutputSink + 'static)>,
    ) -> RelayOutcome {
        match state {
            SessionState::Streaming => {}
            SessionState::Paused => {
                self.metrics.record_discarded();
                return RelayOutcome::Discarded;
            }
            _ => {
                trace!(%state, len = chunk.len(), "Chunk ignored");
                return RelayOutcome::Ignored;
            }
        }

        let Some(sink) = sink else {
            return RelayOutcome::Ignored;
        };

        let len = chunk.len();
        match sink.deliver(chunk) {
            Ok(Delivery::Delivered) => {
                self.metrics.record_delivered(len);
                RelayOutcome::Delivered
            }
            Ok(Delivery::Dropped) => {
                self.metrics.record_dropped();
                RelayOutcome::Dropped
            }
            Err(SinkError::Closed) => RelayOutcome::SinkClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MultipartSink;
    use tokio::sync::mpsc;

    fn relay() -> (FrameRelay, Arc<RelayMetrics>) {
        let metrics = Arc::new(RelayMetrics::new());
        (FrameRelay::new(Arc::clone(&metrics)), metrics)
    }

    #[test]
    fn test_only_starting_begins_stream() {
        assert!(FrameRelay::begins_stream(SessionState::Starting));
        assert!(!FrameRelay::begins_stream(SessionState::Streaming));
        assert!(!FrameRelay::begins_stream(SessionState::Stopped));
    }

    #[test]
    fn test_streaming_delivers_framed_parts() {
        let (relay, metrics) = relay();
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = MultipartSink::new(tx);

        let outcome = relay.relay(SessionState::Streaming, Bytes::from_static(b"jpeg"), Some(&mut sink));

        assert_eq!(outcome, RelayOutcome::Delivered);
        let part = rx.try_recv().unwrap();
        assert!(part.ends_with(b"Content-Length: 4\r\n\r\njpeg"));
        assert_eq!(metrics.snapshot().bytes_delivered, 4);
    }

    #[test]
    fn test_paused_drains_without_writing() {
        let (relay, metrics) = relay();
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = MultipartSink::new(tx);

        for _ in 0..3 {
            let outcome = relay.relay(SessionState::Paused, Bytes::from_static(b"x"), Some(&mut sink));
            assert_eq!(outcome, RelayOutcome::Discarded);
        }

        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().frames_discarded, 3);
    }

    #[test]
    fn test_terminal_states_ignore_output() {
        let (relay, _) = relay();
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = MultipartSink::new(tx);

        for state in [SessionState::Stopping, SessionState::Stopped, SessionState::Error] {
            let outcome = relay.relay(state, Bytes::from_static(b"x"), Some(&mut sink));
            assert_eq!(outcome, RelayOutcome::Ignored);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_consumer_is_reported() {
        let (relay, _) = relay();
        let (tx, rx) = mpsc::channel(4);
        let mut sink = MultipartSink::new(tx);
        drop(rx);

        let outcome = relay.relay(SessionState::Streaming, Bytes::from_static(b"x"), Some(&mut sink));
        assert_eq!(outcome, RelayOutcome::SinkClosed);
    }

    #[test]
    fn test_full_consumer_counts_drop() {
        let (relay, metrics) = relay();
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = MultipartSink::new(tx);

        relay.relay(SessionState::Streaming, Bytes::from_static(b"a"), Some(&mut sink));
        let outcome = relay.relay(SessionState::Streaming, Bytes::from_static(b"b"), Some(&mut sink));

        assert_eq!(outcome, RelayOutcome::Dropped);
        assert_eq!(metrics.snapshot().frames_dropped, 1);
    }
}
