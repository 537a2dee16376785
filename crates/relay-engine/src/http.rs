//! Multipart HTTP delivery.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use relay_ipc::StartOverrides;

use crate::error::SessionError;
use crate::session::SessionHandle;
use crate::sink::{multipart_content_type, MultipartSink, FRAME_QUEUE_CAPACITY};

/// Response headers for a multipart stream.
pub fn stream_headers() -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", multipart_content_type()),
        ("Connection", "close".to_string()),
        ("Cache-Control", "no-cache, no-store, must-revalidate".to_string()),
        ("Pragma", "no-cache".to_string()),
        ("Expires", "0".to_string()),
    ]
}

/// Outcome of a stream request, independent of the HTTP server in use.
#[derive(Debug)]
pub enum StreamResponse {
    /// 200 with multipart parts arriving on `body`.
    ///
    /// Dropping `body` counts as the client disconnecting.
    Streaming {
        headers: Vec<(&'static str, String)>,
        body: mpsc::Receiver<Bytes>,
    },

    /// 503: the session is already serving a client.
    Busy { message: String },

    /// 500: configuration or spawn failure.
    Failed { message: String },
}

impl StreamResponse {
    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Streaming { .. } => 200,
            Self::Busy { .. } => 503,
            Self::Failed { .. } => 500,
        }
    }
}

/// Serves an HTTP-mode session to one client at a time.
#[derive(Clone)]
pub struct HttpStreamer {
    handle: SessionHandle,
}

impl HttpStreamer {
    pub fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Start the session for a requesting client.
    pub async fn handle_request(&self, client: &str) -> StreamResponse {
        let (tx, body) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let sink = Box::new(MultipartSink::new(tx));

        match self.handle.start(StartOverrides::default(), sink).await {
            Ok(()) => {
                info!(session = %self.handle.id(), client, "Client connected");
                StreamResponse::Streaming {
                    headers: stream_headers(),
                    body,
                }
            }
            Err(SessionError::AlreadyActive) => {
                warn!(session = %self.handle.id(), client, "Stream already active, rejecting client");
                StreamResponse::Busy {
                    message: SessionError::AlreadyActive.to_string(),
                }
            }
            Err(e) => {
                error!(session = %self.handle.id(), client, "Stream request failed: {}", e);
                StreamResponse::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_headers() {
        let headers = stream_headers();

        assert_eq!(headers[0].0, "Content-Type");
        assert!(headers[0].1.starts_with("multipart/x-mixed-replace; boundary=--"));
        assert!(headers.contains(&("Connection", "close".to_string())));
        assert!(headers.contains(&("Expires", "0".to_string())));
    }

    #[test]
    fn test_status_codes() {
        let busy = StreamResponse::Busy {
            message: String::new(),
        };
        let failed = StreamResponse::Failed {
            message: String::new(),
        };

        assert_eq!(busy.status(), 503);
        assert_eq!(failed.status(), 500);
    }
}
