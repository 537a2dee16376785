//! Relay metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use relay_ipc::SessionMetrics;

/// Counts what a session's relay did with subprocess output.
///
/// Written by the session actor, read by any handle clone.
#[derive(Debug)]
pub struct RelayMetrics {
    start_time: RwLock<Option<Instant>>,
    frames_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    frames_discarded: AtomicU64,
    frames_dropped: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            frames_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Reset counters for a new run.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        self.frames_delivered.store(0, Ordering::Relaxed);
        self.bytes_delivered.store(0, Ordering::Relaxed);
        self.frames_discarded.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    pub fn record_delivered(&self, bytes: usize) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A chunk drained while paused.
    pub fn record_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// A chunk the consumer had no room for.
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> SessionMetrics {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|start| start.elapsed().as_secs())
            .unwrap_or(0);

        SessionMetrics {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_resets_counters() {
        let metrics = RelayMetrics::new();
        metrics.record_delivered(100);
        metrics.record_discarded();
        metrics.record_dropped();

        metrics.start();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.frames_delivered, 0);
        assert_eq!(snapshot.frames_discarded, 0);
        assert_eq!(snapshot.frames_dropped, 0);
    }

    #[test]
    fn test_counts_bytes() {
        let metrics = RelayMetrics::new();
        metrics.record_delivered(4096);
        metrics.record_delivered(1024);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_delivered, 2);
        assert_eq!(snapshot.bytes_delivered, 5120);
    }
}
