//! Session engine for the RTSP relay.
//!
//! This crate runs one actor per camera stream: it owns the transcoder
//! subprocess, relays its output to a sink, classifies failures from its
//! diagnostics and reports status.

mod classifier;
mod error;
mod handler;
mod http;
mod metrics;
mod pump;
mod relay;
mod session;
mod sink;
mod status;

pub use classifier::{DiagnosticBuffer, ErrorClassifier, DIAGNOSTIC_BUFFER_LIMIT};
pub use error::SessionError;
pub use handler::RelayHandler;
pub use http::{stream_headers, HttpStreamer, StreamResponse};
pub use metrics::RelayMetrics;
pub use relay::{FrameRelay, RelayOutcome};
pub use session::{SessionHandle, SessionMode, SessionOptions, SessionSnapshot};
pub use sink::{
    frame_part, multipart_content_type, part_header, ClosedFuture, Delivery, MultipartSink, OutputSink,
    PipelineSink, RelayFrame, SinkError, FRAME_QUEUE_CAPACITY, MJPEG_BOUNDARY,
};
pub use status::status;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
