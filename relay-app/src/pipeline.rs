//! Consumer for direct-mode frames.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_engine::RelayFrame;
use relay_ipc::SessionId;

/// How often pipeline throughput is logged.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Running totals for one pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub bytes: u64,
    pub last_sequence: u64,
}

impl PipelineStats {
    fn record(&mut self, frame: &RelayFrame) {
        self.frames += 1;
        self.bytes += frame.payload.len() as u64;
        self.last_sequence = frame.sequence;
    }
}

/// Drain a session's frames, logging throughput periodically.
///
/// Returns when the session's frame sender is gone.
pub async fn run_pipeline(id: SessionId, mut frames: mpsc::Receiver<RelayFrame>) -> PipelineStats {
    let mut stats = PipelineStats::default();
    let mut last_log = Instant::now();

    while let Some(frame) = frames.recv().await {
        stats.record(&frame);

        if stats.frames <= 3 {
            debug!(session = %id, sequence = frame.sequence, len = frame.payload.len(), "Frame received");
        }

        if last_log.elapsed() >= STATS_INTERVAL {
            info!(
                session = %id,
                "Pipeline stats: frames={}, bytes={}, last_sequence={}",
                stats.frames, stats.bytes, stats.last_sequence
            );
            last_log = Instant::now();
        }
    }

    debug!(session = %id, frames = stats.frames, "Pipeline closed");
    stats
}
