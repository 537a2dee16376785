//! Registry of pre-allocated sessions and command dispatch.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use relay_ipc::{
    RelayEvent, SessionCommand, SessionConfig, SessionId, SessionState, StartOverrides,
    StopReason,
};

use crate::error::SessionError;
use crate::http::HttpStreamer;
use crate::session::{SessionHandle, SessionOptions};
use crate::sink::{PipelineSink, RelayFrame, FRAME_QUEUE_CAPACITY};
use crate::SessionResult;

/// A direct-mode session and the pipeline it feeds.
#[derive(Clone)]
struct DirectRelay {
    handle: SessionHandle,
    frames: mpsc::Sender<RelayFrame>,
}

#[derive(Clone)]
enum Endpoint {
    Direct(DirectRelay),
    Http(HttpStreamer),
}

impl Endpoint {
    fn handle(&self) -> &SessionHandle {
        match self {
            Self::Direct(direct) => &direct.handle,
            Self::Http(streamer) => streamer.handle(),
        }
    }
}

/// Owns every session for the lifetime of the host.
pub struct RelayHandler {
    endpoints: RwLock<HashMap<SessionId, Endpoint>>,
    events: Option<Sender<RelayEvent>>,
}

impl RelayHandler {
    pub fn new(events: Option<Sender<RelayEvent>>) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a direct-mode session.
    ///
    /// Returns the receiving end of its frame pipeline. Dropping the
    /// receiver stops a running stream.
    pub fn add_direct(
        &self,
        id: SessionId,
        config: SessionConfig,
        options: SessionOptions,
    ) -> mpsc::Receiver<RelayFrame> {
        let (frames, rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let handle = SessionHandle::spawn(id.clone(), config, options, self.events.clone());

        info!(session = %id, "Direct session registered");
        self.insert(id, Endpoint::Direct(DirectRelay { handle, frames }));
        rx
    }

    /// Register an HTTP-mode session.
    pub fn add_http(&self, id: SessionId, config: SessionConfig, options: SessionOptions) -> HttpStreamer {
        let handle = SessionHandle::spawn(id.clone(), config, options, self.events.clone());
        let streamer = HttpStreamer::new(handle);

        info!(session = %id, "HTTP session registered");
        self.insert(id, Endpoint::Http(streamer.clone()));
        streamer
    }

    fn insert(&self, id: SessionId, endpoint: Endpoint) {
        if let Some(previous) = self.endpoints.write().insert(id, endpoint) {
            warn!(session = %previous.handle().id(), "Replacing existing session");
            let _ = previous.handle().stop(StopReason::Shutdown);
            previous.handle().close();
        }
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionHandle> {
        self.endpoints.read().get(id).map(|e| e.handle().clone())
    }

    pub fn http(&self, id: &SessionId) -> Option<HttpStreamer> {
        match self.endpoints.read().get(id) {
            Some(Endpoint::Http(streamer)) => Some(streamer.clone()),
            _ => None,
        }
    }

    /// Registered session ids, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.endpoints.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Apply a command named by `topic` (missing means start).
    ///
    /// Unknown commands are rejected with a warning and change nothing.
    #[instrument(name = "dispatch", skip_all, fields(session = %id, ?topic))]
    pub async fn dispatch(
        &self,
        id: &SessionId,
        topic: Option<&str>,
        overrides: StartOverrides,
    ) -> SessionResult<()> {
        let command = SessionCommand::from_topic(topic).map_err(|e| {
            warn!("Ignoring unknown command: {}", e.0);
            SessionError::from(e)
        })?;

        let endpoint = self
            .endpoints
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;

        debug!(%command, "Dispatching command");
        let handle = endpoint.handle();
        match command {
            SessionCommand::Start => match &endpoint {
                Endpoint::Direct(direct) => {
                    let sink = PipelineSink::new(id.clone(), direct.frames.clone());
                    handle.start(overrides, Box::new(sink)).await
                }
                Endpoint::Http(_) => Err(SessionError::NotDirect(id.clone())),
            },
            SessionCommand::Stop => handle.stop(StopReason::UserRequested),
            SessionCommand::Pause => handle.pause(),
            SessionCommand::Resume => handle.resume(),
        }
    }

    /// Stop every session and wait for each to reach `stopped`.
    ///
    /// Each session gets its mode's deadline; sessions still running after
    /// it are abandoned with a warning. Sessions are closed afterwards.
    #[instrument(name = "handler_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let endpoints: Vec<Endpoint> = self.endpoints.write().drain().map(|(_, e)| e).collect();
        info!(sessions = endpoints.len(), "Shutting down sessions");

        let mut waits = JoinSet::new();
        for endpoint in endpoints {
            let handle = endpoint.handle().clone();
            let _ = handle.stop(StopReason::Shutdown);

            waits.spawn(async move {
                let deadline = handle.mode().shutdown_deadline();
                let stopped = handle.wait_for_state(SessionState::is_stopped, deadline).await;
                if stopped.is_none() {
                    warn!(
                        session = %handle.id(),
                        state = %handle.state(),
                        "Session did not stop within {:?}, abandoning",
                        deadline
                    );
                }
                handle.close();
            });
        }

        while waits.join_next().await.is_some() {}
        info!("All sessions shut down");
    }
}
