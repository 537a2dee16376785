//! Per-stream session actor.
//!
//! Each session runs one task that owns its state, subprocess handle, sink
//! and diagnostic buffer. Commands from callers and events from the
//! subprocess pumps arrive on a single ordered mailbox and are handled one
//! at a time, so a lifecycle command can never interleave with a half-handled
//! exit or output chunk.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use relay_ipc::{
    RelayEvent, SessionConfig, SessionId, SessionMetrics, SessionState, StartOverrides,
    StatusSignal, StopReason,
};
use relay_process::{
    ProcessExit, ProcessHandle, ProcessSupervisor, RtspTarget, DIRECT_GRACE, HTTP_GRACE,
};

use crate::classifier::{DiagnosticBuffer, ErrorClassifier};
use crate::error::SessionError;
use crate::metrics::RelayMetrics;
use crate::pump;
use crate::relay::{FrameRelay, RelayOutcome};
use crate::sink::OutputSink;
use crate::status::status;
use crate::SessionResult;

/// Diagnostic text is logged up to this many characters per chunk.
const DIAGNOSTIC_LOG_LIMIT: usize = 100;

/// How a session delivers its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Raw frames into a processing pipeline.
    Direct,

    /// Multipart stream to an HTTP client.
    Http,
}

impl SessionMode {
    /// Grace window between SIGTERM and SIGKILL.
    pub fn grace(self) -> Duration {
        match self {
            Self::Direct => DIRECT_GRACE,
            Self::Http => HTTP_GRACE,
        }
    }

    /// How long handler shutdown waits for this session to stop.
    pub fn shutdown_deadline(self) -> Duration {
        match self {
            Self::Direct => Duration::from_millis(3000),
            Self::Http => Duration::from_millis(1600),
        }
    }
}

/// Construction options for a session.
#[derive(Clone)]
pub struct SessionOptions {
    pub mode: SessionMode,

    /// Overrides the mode's grace window.
    pub grace: Option<Duration>,

    pub supervisor: ProcessSupervisor,
}

impl SessionOptions {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            grace: None,
            supervisor: ProcessSupervisor::new(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    fn grace(&self) -> Duration {
        self.grace.unwrap_or_else(|| self.mode.grace())
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub last_error: Option<String>,
    pub status: StatusSignal,

    /// Pid of the live subprocess, if any.
    pub pid: Option<u32>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Stopped,
            last_error: None,
            status: status(SessionState::Stopped, None),
            pid: None,
        }
    }
}

/// Events originating from a subprocess.
#[derive(Debug)]
pub(crate) enum ProcessEvent {
    Output(Bytes),
    Diagnostic(String),
    Exit(ProcessExit),
}

/// Everything a session actor reacts to.
pub(crate) enum SessionMessage {
    Start {
        overrides: StartOverrides,
        sink: Box<dyn OutputSink>,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Stop(StopReason),
    Pause,
    Resume,
    Process {
        generation: u64,
        event: ProcessEvent,
    },
    SinkClosed {
        generation: u64,
    },
    Close,
}

/// Cloneable handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    mode: SessionMode,
    mailbox: mpsc::UnboundedSender<SessionMessage>,
    snapshot: watch::Receiver<SessionSnapshot>,
    metrics: Arc<RelayMetrics>,
}

impl SessionHandle {
    /// Spawn a session actor in the stopped state.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        id: SessionId,
        config: SessionConfig,
        options: SessionOptions,
        events: Option<Sender<RelayEvent>>,
    ) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let metrics = Arc::new(RelayMetrics::new());

        let actor = SessionActor {
            id: id.clone(),
            grace: options.grace(),
            config,
            supervisor: options.supervisor,
            classifier: ErrorClassifier::default(),
            relay: FrameRelay::new(Arc::clone(&metrics)),
            metrics: Arc::clone(&metrics),
            state: SessionState::Stopped,
            generation: 0,
            process: None,
            sink: None,
            sink_watch: None,
            diagnostics: DiagnosticBuffer::default(),
            last_error: None,
            mailbox: mailbox.downgrade(),
            snapshot: snapshot_tx,
            event_tx: events,
        };
        tokio::spawn(actor.run(inbox));

        Self {
            id,
            mode: options.mode,
            mailbox,
            snapshot: snapshot_rx,
            metrics,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    fn send(&self, message: SessionMessage) -> SessionResult<()> {
        self.mailbox
            .send(message)
            .map_err(|_| SessionError::Closed(self.id.clone()))
    }

    /// Start a stream into `sink`.
    ///
    /// Resolves once the subprocess has been spawned (or the start refused).
    /// On failure the sink is released.
    pub async fn start(&self, overrides: StartOverrides, sink: Box<dyn OutputSink>) -> SessionResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(SessionMessage::Start {
            overrides,
            sink,
            reply,
        })?;
        response
            .await
            .map_err(|_| SessionError::Closed(self.id.clone()))?
    }

    pub fn stop(&self, reason: StopReason) -> SessionResult<()> {
        self.send(SessionMessage::Stop(reason))
    }

    pub fn pause(&self) -> SessionResult<()> {
        self.send(SessionMessage::Pause)
    }

    pub fn resume(&self) -> SessionResult<()> {
        self.send(SessionMessage::Resume)
    }

    /// End the actor. A subprocess still alive is force-killed.
    pub fn close(&self) {
        let _ = self.mailbox.send(SessionMessage::Close);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics.snapshot()
    }

    /// Wait until the state satisfies `predicate`, up to `timeout`.
    pub async fn wait_for_state<F>(&self, mut predicate: F, timeout: Duration) -> Option<SessionState>
    where
        F: FnMut(SessionState) -> bool,
    {
        let mut snapshot = self.snapshot.clone();
        let result = match tokio::time::timeout(timeout, snapshot.wait_for(|s| predicate(s.state))).await {
            Ok(Ok(current)) => Some(current.state),
            _ => None,
        };
        result
    }
}

struct SessionActor {
    id: SessionId,
    grace: Duration,
    config: SessionConfig,
    supervisor: ProcessSupervisor,
    classifier: ErrorClassifier,
    relay: FrameRelay,
    metrics: Arc<RelayMetrics>,
    state: SessionState,
    generation: u64,
    process: Option<ProcessHandle>,
    sink: Option<Box<dyn OutputSink>>,
    sink_watch: Option<JoinHandle<()>>,
    diagnostics: DiagnosticBuffer,
    last_error: Option<String>,
    mailbox: mpsc::WeakUnboundedSender<SessionMessage>,
    snapshot: watch::Sender<SessionSnapshot>,
    event_tx: Option<Sender<RelayEvent>>,
}

impl SessionActor {
    #[instrument(name = "session", skip_all, fields(session = %self.id))]
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionMessage>) {
        debug!("Session ready");

        while let Some(message) = inbox.recv().await {
            match message {
                SessionMessage::Start {
                    overrides,
                    sink,
                    reply,
                } => {
                    let result = self.start(overrides, sink);
                    let _ = reply.send(result);
                }
                SessionMessage::Stop(reason) => self.stop(reason),
                SessionMessage::Pause => self.pause(),
                SessionMessage::Resume => self.resume(),
                SessionMessage::Process { generation, event } => {
                    if generation != self.generation {
                        debug!(generation, current = self.generation, "Discarding stale process event");
                        continue;
                    }
                    match event {
                        ProcessEvent::Output(chunk) => self.handle_output(chunk),
                        ProcessEvent::Diagnostic(text) => self.handle_diagnostic(&text),
                        ProcessEvent::Exit(exit) => self.handle_exit(exit),
                    }
                }
                SessionMessage::SinkClosed { generation } => self.handle_sink_closed(generation),
                SessionMessage::Close => break,
            }
        }

        self.stop(StopReason::Shutdown);
        debug!("Session closed");
    }

    #[instrument(name = "session_start", skip_all, fields(session = %self.id))]
    fn start(&mut self, overrides: StartOverrides, sink: Box<dyn OutputSink>) -> SessionResult<()> {
        if self.process.is_some() || !self.state.accepts_start() {
            warn!(state = %self.state, "Start rejected, stream already active");
            return Err(SessionError::AlreadyActive);
        }

        let config = self.config.with_overrides(&overrides);
        self.diagnostics.clear();
        self.last_error = None;
        self.generation += 1;
        self.transition_to(SessionState::Starting);

        let target = match RtspTarget::from_config(&config) {
            Ok(target) => target,
            Err(e) => return Err(self.fail_start(e.into())),
        };

        let Some(mailbox) = self.mailbox.upgrade() else {
            return Err(self.fail_start(SessionError::Closed(self.id.clone())));
        };

        info!(%target, "Starting stream");
        let spawned = match self.supervisor.start(&config, &target) {
            Ok(spawned) => spawned,
            Err(e) => return Err(self.fail_start(e.into())),
        };

        let generation = self.generation;
        tokio::spawn(pump::pump_output(spawned.stdout, generation, mailbox.clone()));
        let diagnostics = tokio::spawn(pump::pump_diagnostics(spawned.stderr, generation, mailbox.clone()));
        tokio::spawn(pump::forward_exit(spawned.exit, diagnostics, generation, mailbox.clone()));
        self.sink_watch = Some(tokio::spawn(pump::watch_sink(sink.closed(), generation, mailbox)));

        debug!(sink = sink.name(), pid = %spawned.handle.id(), "Stream attached");
        self.process = Some(spawned.handle);
        self.sink = Some(sink);
        self.metrics.start();
        self.publish();

        Ok(())
    }

    /// Record a failed start. The sink passed to `start` is dropped by the caller.
    fn fail_start(&mut self, err: SessionError) -> SessionError {
        error!("Stream start failed: {}", err);
        self.record_error(&err);
        self.transition_to(SessionState::Error);
        err
    }

    fn stop(&mut self, reason: StopReason) {
        match self.state {
            SessionState::Stopped => {
                debug!("Already stopped, ignoring stop");
                return;
            }
            SessionState::Stopping => {
                debug!("Stop already in flight");
                return;
            }
            _ => {}
        }

        info!(reason = reason.message(), "Stopping stream");
        self.release_sink();

        if self.process.is_none() {
            self.transition_to(SessionState::Stopped);
            return;
        }

        self.transition_to(SessionState::Stopping);
        if let Some(process) = self.process.as_mut() {
            self.supervisor.stop(process, self.grace);
        }
    }

    fn pause(&mut self) {
        if self.state != SessionState::Streaming {
            debug!(state = %self.state, "Pause ignored, not streaming");
            return;
        }
        self.transition_to(SessionState::Paused);
    }

    fn resume(&mut self) {
        if self.state != SessionState::Paused {
            debug!(state = %self.state, "Resume ignored, not paused");
            return;
        }
        self.transition_to(SessionState::Streaming);
    }

    fn handle_output(&mut self, chunk: Bytes) {
        if FrameRelay::begins_stream(self.state) {
            info!("First frame received, streaming");
            self.transition_to(SessionState::Streaming);
        }

        if self.relay.relay(self.state, chunk, self.sink.as_deref_mut()) == RelayOutcome::SinkClosed {
            info!("Output consumer closed");
            self.stop(StopReason::ClientDisconnected);
        }
    }

    fn handle_diagnostic(&mut self, text: &str) {
        let line = text.trim();
        if !line.is_empty() {
            let shown: String = line.chars().take(DIAGNOSTIC_LOG_LIMIT).collect();
            info!("transcoder: {}", shown);
        }

        self.diagnostics.push(text);
        if !self.state.is_running() {
            return;
        }

        if let Some(kind) = self.classifier.classify(self.diagnostics.as_str()) {
            self.fail(SessionError::Connection(kind));
        }
    }

    #[instrument(name = "session_exit", skip_all, fields(session = %self.id, %exit))]
    fn handle_exit(&mut self, exit: ProcessExit) {
        let Some(process) = self.process.take() else {
            return;
        };
        let uptime = process.uptime();
        drop(process);

        let metrics = self.metrics.snapshot();
        info!(
            uptime_secs = uptime.as_secs(),
            frames = metrics.frames_delivered,
            bytes = metrics.bytes_delivered,
            discarded = metrics.frames_discarded,
            dropped = metrics.frames_dropped,
            "Transcoder exited"
        );
        self.metrics.stop();

        match self.state {
            SessionState::Stopping => self.transition_to(SessionState::Stopped),
            state if state.is_running() => {
                if let Some(kind) = self.classifier.classify(self.diagnostics.as_str()) {
                    self.fail(SessionError::Connection(kind));
                } else if exit.is_failure() {
                    if let Some(line) = self.diagnostics.last_line() {
                        warn!("Last diagnostic: {}", line);
                    }
                    self.fail(SessionError::UnexpectedExit(exit));
                } else {
                    warn!("Transcoder exited without being asked to");
                    self.release_sink();
                    self.transition_to(SessionState::Stopped);
                }
            }
            // Error keeps its message; stopped has nothing to do.
            _ => self.publish(),
        }

        self.diagnostics.clear();
        self.release_sink();
    }

    fn handle_sink_closed(&mut self, generation: u64) {
        if generation != self.generation || self.sink.is_none() {
            debug!(generation, "Sink close already handled");
            return;
        }

        info!("Client disconnected");
        self.stop(StopReason::ClientDisconnected);
    }

    /// Move to `error`, release the sink and terminate any live subprocess.
    fn fail(&mut self, err: SessionError) {
        error!("Stream failed: {}", err);
        self.record_error(&err);
        self.release_sink();
        self.transition_to(SessionState::Error);

        if let Some(process) = self.process.as_mut() {
            self.supervisor.stop(process, self.grace);
        }
    }

    fn record_error(&mut self, err: &SessionError) {
        self.last_error = Some(err.summary());
        self.send_event(RelayEvent::Error {
            session: self.id.clone(),
            message: err.to_string(),
        });
    }

    fn release_sink(&mut self) {
        if let Some(watch) = self.sink_watch.take() {
            watch.abort();
        }
        if let Some(sink) = self.sink.take() {
            debug!(sink = sink.name(), "Sink released");
        }
    }

    fn transition_to(&mut self, next: SessionState) {
        let previous = self.state;
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!(%previous, %next, "Invalid state transition");
            return;
        }

        self.state = next;
        debug!(%previous, current = %next, "State transition");

        self.send_event(RelayEvent::StateChanged {
            session: self.id.clone(),
            previous,
            current: next,
        });
        self.publish();
    }

    /// Refresh the snapshot and announce the status.
    fn publish(&mut self) {
        let status = status(self.state, self.last_error.as_deref());
        let snapshot = SessionSnapshot {
            state: self.state,
            last_error: self.last_error.clone(),
            status: status.clone(),
            pid: self.process.as_ref().map(|p| p.id().0),
        };
        self.snapshot.send_replace(snapshot);

        self.send_event(RelayEvent::Status {
            session: self.id.clone(),
            status,
        });
    }

    fn send_event(&self, event: RelayEvent) {
        if let Some(event_tx) = &self.event_tx {
            if let Err(e) = event_tx.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}
