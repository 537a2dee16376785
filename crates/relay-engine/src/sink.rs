//! Output sinks: where relayed frames go.

use std::future::Future;
use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use relay_ipc::SessionId;

/// Multipart boundary marker used in HTTP delivery.
pub const MJPEG_BOUNDARY: &str = "RTSP_RELAY_MJPEG_BOUNDARY";

/// Queue depth between the relay and a consumer.
pub const FRAME_QUEUE_CAPACITY: usize = 32;

/// Resolves when a sink's consumer has gone away.
pub type ClosedFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Result of handing a frame to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the consumer.
    Delivered,

    /// Consumer queue full; the frame was dropped.
    Dropped,
}

/// Sink write failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The consumer closed the stream.
    #[error("output consumer closed")]
    Closed,
}

/// Destination for relayed frames.
///
/// `deliver` must never wait on the consumer: a session calls it from its
/// serialized loop and the producer must keep draining.
pub trait OutputSink: Send {
    /// Hand one frame unit to the consumer.
    fn deliver(&mut self, frame: Bytes) -> Result<Delivery, SinkError>;

    /// A future that resolves once the consumer is gone.
    fn closed(&self) -> ClosedFuture;

    /// Sink name for diagnostics.
    fn name(&self) -> &'static str;
}

/// `Content-Type` of the multipart response.
pub fn multipart_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary=--{MJPEG_BOUNDARY}")
}

/// Part header preceding a frame of `len` bytes.
pub fn part_header(len: usize) -> String {
    format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n")
}

/// Prefix a frame with its part header.
pub fn frame_part(frame: &[u8]) -> Bytes {
    let header = part_header(frame.len());
    let mut part = BytesMut::with_capacity(header.len() + frame.len());
    part.put_slice(header.as_bytes());
    part.put_slice(frame);
    part.freeze()
}

fn map_try_send<T>(result: Result<(), TrySendError<T>>) -> Result<Delivery, SinkError> {
    match result {
        Ok(()) => Ok(Delivery::Delivered),
        Err(TrySendError::Full(_)) => Ok(Delivery::Dropped),
        Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
    }
}

/// Writes multipart parts into an HTTP response body channel.
pub struct MultipartSink {
    body: mpsc::Sender<Bytes>,
}

impl MultipartSink {
    pub fn new(body: mpsc::Sender<Bytes>) -> Self {
        Self { body }
    }
}

impl OutputSink for MultipartSink {
    fn deliver(&mut self, frame: Bytes) -> Result<Delivery, SinkError> {
        map_try_send(self.body.try_send(frame_part(&frame)))
    }

    fn closed(&self) -> ClosedFuture {
        let body = self.body.clone();
        Box::pin(async move { body.closed().await })
    }

    fn name(&self) -> &'static str {
        "multipart"
    }
}

/// A raw frame emitted into a processing pipeline.
#[derive(Debug, Clone)]
pub struct RelayFrame {
    /// Session that produced the frame.
    pub session: SessionId,

    /// Position within the current run, starting at 1.
    pub sequence: u64,

    /// Unframed subprocess output.
    pub payload: Bytes,
}

/// Forwards unframed chunks to a pipeline consumer.
pub struct PipelineSink {
    session: SessionId,
    frames: mpsc::Sender<RelayFrame>,
    sequence: u64,
}

impl PipelineSink {
    pub fn new(session: SessionId, frames: mpsc::Sender<RelayFrame>) -> Self {
        Self {
            session,
            frames,
            sequence: 0,
        }
    }
}

impl OutputSink for PipelineSink {
    fn deliver(&mut self, frame: Bytes) -> Result<Delivery, SinkError> {
        self.sequence += 1;
        map_try_send(self.frames.try_send(RelayFrame {
            session: self.session.clone(),
            sequence: self.sequence,
            payload: frame,
        }))
    }

    fn closed(&self) -> ClosedFuture {
        let frames = self.frames.clone();
        Box::pin(async move { frames.closed().await })
    }

    fn name(&self) -> &'static str {
        "pipeline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_header_layout() {
        assert_eq!(
            part_header(4096),
            format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: 4096\r\n\r\n")
        );
    }

    #[test]
    fn test_frame_part_is_header_then_payload() {
        let payload = vec![0xAB; 4096];
        let part = frame_part(&payload);
        let header = part_header(4096);

        assert_eq!(part.len(), header.len() + 4096);
        assert!(part.starts_with(header.as_bytes()));
        assert_eq!(&part[header.len()..], payload.as_slice());
    }

    #[test]
    fn test_content_type_carries_boundary() {
        assert_eq!(
            multipart_content_type(),
            "multipart/x-mixed-replace; boundary=--RTSP_RELAY_MJPEG_BOUNDARY"
        );
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = MultipartSink::new(tx);

        assert_eq!(sink.deliver(Bytes::from_static(b"a")), Ok(Delivery::Delivered));
        assert_eq!(sink.deliver(Bytes::from_static(b"b")), Ok(Delivery::Dropped));
    }

    #[test]
    fn test_closed_consumer_is_an_error() {
        let (tx, rx) = mpsc::channel(4);
        let mut sink = PipelineSink::new(SessionId::from("cam"), tx);
        drop(rx);

        assert_eq!(sink.deliver(Bytes::from_static(b"a")), Err(SinkError::Closed));
    }

    #[test]
    fn test_pipeline_frames_are_sequenced() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = PipelineSink::new(SessionId::from("cam"), tx);

        sink.deliver(Bytes::from_static(b"one")).unwrap();
        sink.deliver(Bytes::from_static(b"two")).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(second.payload, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_closed_future_resolves_when_consumer_drops() {
        let (tx, rx) = mpsc::channel(4);
        let sink = MultipartSink::new(tx);
        let closed = sink.closed();

        drop(rx);

        tokio::time::timeout(std::time::Duration::from_secs(1), closed)
            .await
            .unwrap();
    }
}
