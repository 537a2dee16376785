//! HTTP routes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, instrument, warn};

use relay_engine::{RelayHandler, SessionError, SessionHandle, SessionMode, SessionSnapshot, StreamResponse};
use relay_ipc::{SessionId, SessionMetrics, StartOverrides};

type AppState = Arc<RelayHandler>;

/// Build the router for all session endpoints.
pub fn router(handler: Arc<RelayHandler>) -> Router {
    Router::new()
        .route("/stream/{id}", get(stream))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(session_status))
        .route("/sessions/{id}/{command}", post(session_command))
        .with_state(handler)
}

/// Serve an HTTP-mode session as a multipart stream.
#[instrument(skip(handler))]
async fn stream(
    State(handler): State<AppState>,
    Path(id): Path<String>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Response {
    let Some(streamer) = handler.http(&SessionId::new(id)) else {
        return (StatusCode::NOT_FOUND, "Unknown stream").into_response();
    };

    stream_response(streamer.handle_request(&client.to_string()).await)
}

fn stream_response(response: StreamResponse) -> Response {
    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    match response {
        StreamResponse::Streaming { headers, body } => {
            let mut builder = Response::builder().status(status);
            for (name, value) in headers {
                builder = builder.header(name, value);
            }

            let body = Body::from_stream(ReceiverStream::new(body).map(Ok::<Bytes, Infallible>));
            builder.body(body).unwrap_or_else(|e| {
                error!("Failed to build stream response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })
        }
        StreamResponse::Busy { message } | StreamResponse::Failed { message } => {
            (status, message).into_response()
        }
    }
}

/// Status body for one session.
#[derive(Debug, Serialize)]
struct SessionStatus {
    id: SessionId,
    mode: SessionMode,
    #[serde(flatten)]
    snapshot: SessionSnapshot,
    metrics: SessionMetrics,
}

impl From<&SessionHandle> for SessionStatus {
    fn from(handle: &SessionHandle) -> Self {
        Self {
            id: handle.id().clone(),
            mode: handle.mode(),
            snapshot: handle.snapshot(),
            metrics: handle.metrics(),
        }
    }
}

async fn list_sessions(State(handler): State<AppState>) -> Json<Vec<SessionStatus>> {
    let statuses = handler
        .ids()
        .iter()
        .filter_map(|id| handler.session(id))
        .map(|handle| SessionStatus::from(&handle))
        .collect();
    Json(statuses)
}

async fn session_status(State(handler): State<AppState>, Path(id): Path<String>) -> Response {
    let id = SessionId::new(id);
    match handler.session(&id) {
        Some(handle) => Json(SessionStatus::from(&handle)).into_response(),
        None => error_response(&SessionError::UnknownSession(id)),
    }
}

/// Apply a lifecycle command. A JSON body may override the target for `start`.
#[instrument(skip(handler, body))]
async fn session_command(
    State(handler): State<AppState>,
    Path((id, command)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let overrides = if body.is_empty() {
        StartOverrides::default()
    } else {
        match serde_json::from_slice::<StartOverrides>(&body) {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!("Rejecting malformed overrides: {}", e);
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response();
            }
        }
    };

    let id = SessionId::new(id);
    match handler.dispatch(&id, Some(&command), overrides).await {
        Ok(()) => {
            debug!("Command accepted");
            match handler.session(&id) {
                Some(handle) => (StatusCode::ACCEPTED, Json(SessionStatus::from(&handle))).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            }
        }
        Err(e) => error_response(&e),
    }
}

fn error_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
        SessionError::UnknownCommand(_) => StatusCode::BAD_REQUEST,
        SessionError::NotDirect(_) => StatusCode::CONFLICT,
        SessionError::AlreadyActive => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &SessionError) -> Response {
    (error_status(err), Json(json!({ "error": err.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_ipc::UnknownCommand;
    use tokio::sync::mpsc;

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            error_status(&SessionError::UnknownSession(SessionId::from("cam"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&SessionError::UnknownCommand(UnknownCommand("rewind".to_string()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&SessionError::AlreadyActive),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(&SessionError::ClientDisconnected),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_stream_response_carries_headers() {
        let (_tx, body) = mpsc::channel(1);
        let response = stream_response(StreamResponse::Streaming {
            headers: relay_engine::stream_headers(),
            body,
        });

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("multipart/x-mixed-replace"));
        assert_eq!(response.headers()["cache-control"], "no-cache, no-store, must-revalidate");
    }

    #[test]
    fn test_busy_maps_to_503() {
        let response = stream_response(StreamResponse::Busy {
            message: "Stream already active for this session".to_string(),
        });
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
