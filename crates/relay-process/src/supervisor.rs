//! Subprocess launch, termination and exit reporting.

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use relay_ipc::SessionConfig;

use crate::error::ProcessError;
use crate::launcher::{FfmpegLauncher, Launcher};
use crate::target::RtspTarget;
use crate::ProcessResult;

/// Operating-system process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,

    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// True when the process reported a nonzero exit code.
    pub fn is_failure(&self) -> bool {
        matches!(self.code, Some(code) if code != 0)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ControlSignal {
    Terminate,
    Kill,
}

/// Ownership token for a live subprocess.
///
/// Signals are routed to the task that owns the child, which only delivers
/// them while the child has not been reaped, so a recycled pid is never hit.
/// Dropping the handle force-kills a process that is still running.
pub struct ProcessHandle {
    id: ProcessId,
    signals: mpsc::UnboundedSender<ControlSignal>,
    escalation: Option<JoinHandle<()>>,
    started_at: Instant,
}

impl ProcessHandle {
    fn new(id: ProcessId, signals: mpsc::UnboundedSender<ControlSignal>) -> Self {
        Self {
            id,
            signals,
            escalation: None,
            started_at: Instant::now(),
        }
    }

    /// Process identifier.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Time since the process was spawned.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether termination has already been requested.
    pub fn is_stopping(&self) -> bool {
        self.escalation.is_some()
    }

    /// Send a graceful termination signal and arm the forced-kill timer.
    ///
    /// Returns immediately. A second call while a stop is in flight does
    /// nothing and returns false; the timer is never re-armed.
    pub fn stop(&mut self, grace: Duration) -> bool {
        if self.escalation.is_some() {
            debug!(pid = %self.id, "Stop already in flight");
            return false;
        }

        info!(pid = %self.id, grace_ms = grace.as_millis() as u64, "Terminating subprocess");
        let _ = self.signals.send(ControlSignal::Terminate);

        let signals = self.signals.clone();
        self.escalation = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = signals.send(ControlSignal::Kill);
        }));

        true
    }

    /// Force-kill immediately.
    pub fn kill(&self) {
        let _ = self.signals.send(ControlSignal::Kill);
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(escalation) = self.escalation.take() {
            escalation.abort();
        }
        // No-op once the owning task has observed the exit.
        let _ = self.signals.send(ControlSignal::Kill);
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

/// A freshly spawned subprocess and its streams.
pub struct SpawnedProcess {
    pub handle: ProcessHandle,

    /// Media output.
    pub stdout: ChildStdout,

    /// Diagnostic output.
    pub stderr: ChildStderr,

    /// Resolves exactly once with the exit status.
    pub exit: oneshot::Receiver<ProcessExit>,
}

/// Launches transcoder subprocesses and enforces their termination.
#[derive(Clone)]
pub struct ProcessSupervisor {
    launcher: Arc<dyn Launcher>,
}

impl ProcessSupervisor {
    /// Create a supervisor that launches ffmpeg.
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(FfmpegLauncher))
    }

    /// Create a supervisor with a custom launcher.
    pub fn with_launcher(launcher: Arc<dyn Launcher>) -> Self {
        Self { launcher }
    }

    /// Spawn the subprocess for a target.
    ///
    /// Must be called from within a Tokio runtime. Spawn failures are
    /// returned synchronously and never produce a handle.
    #[instrument(name = "process_start", skip_all, fields(target = %target))]
    pub fn start(&self, config: &SessionConfig, target: &RtspTarget) -> ProcessResult<SpawnedProcess> {
        let spec = self.launcher.command(target, config);
        debug!(launcher = self.launcher.name(), command = %spec, "Spawning subprocess");

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let id = ProcessId(child.id().unwrap_or_default());
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(watch_exit(child, id, signal_rx, exit_tx));

        info!(pid = %id, program = %spec.program, "Subprocess started");

        Ok(SpawnedProcess {
            handle: ProcessHandle::new(id, signal_tx),
            stdout,
            stderr,
            exit: exit_rx,
        })
    }

    /// Gracefully stop a subprocess, escalating after `grace`.
    pub fn stop(&self, handle: &mut ProcessHandle, grace: Duration) -> bool {
        handle.stop(grace)
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Own the child until it exits, delivering control signals meanwhile.
async fn watch_exit(
    mut child: Child,
    id: ProcessId,
    mut signals: mpsc::UnboundedReceiver<ControlSignal>,
    exit_tx: oneshot::Sender<ProcessExit>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = signals.recv() => deliver_signal(&mut child, id, signal),
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit::from(status),
        Err(e) => {
            error!(pid = %id, "Failed to wait for subprocess: {}", e);
            ProcessExit { code: None, signal: None }
        }
    };

    debug!(pid = %id, %exit, "Subprocess exited");
    let _ = exit_tx.send(exit);
}

fn deliver_signal(child: &mut Child, id: ProcessId, signal: ControlSignal) {
    // `id()` is None once the child has been reaped.
    let Some(raw_pid) = child.id() else {
        debug!(pid = %id, ?signal, "Subprocess already exited, signal skipped");
        return;
    };

    match signal {
        ControlSignal::Terminate => terminate(child, raw_pid),
        ControlSignal::Kill => {
            warn!(pid = %id, "Forcing subprocess termination (SIGKILL)");
            if let Err(e) = child.start_kill() {
                warn!(pid = %id, "Failed to kill subprocess: {}", e);
            }
        }
    }
}

#[cfg(unix)]
fn terminate(_child: &mut Child, raw_pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(raw_pid as i32), Signal::SIGTERM) {
        warn!(pid = raw_pid, "Failed to send SIGTERM: {}", e);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, raw_pid: u32) {
    if let Err(e) = child.start_kill() {
        warn!(pid = raw_pid, "Failed to terminate subprocess: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::launcher::CommandSpec;

    struct ShellLauncher(&'static str);

    impl Launcher for ShellLauncher {
        fn command(&self, _target: &RtspTarget, _config: &SessionConfig) -> CommandSpec {
            CommandSpec::new("sh", vec!["-c".to_string(), self.0.to_string()])
        }

        fn name(&self) -> &'static str {
            "sh"
        }
    }

    fn spawn(script: &'static str) -> SpawnedProcess {
        let config = SessionConfig::new("cam.local");
        let target = RtspTarget::from_config(&config).unwrap();
        ProcessSupervisor::with_launcher(Arc::new(ShellLauncher(script)))
            .start(&config, &target)
            .unwrap()
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let spawned = spawn("exit 3");
        let exit = tokio::time::timeout(Duration::from_secs(5), spawned.exit)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit.code, Some(3));
        assert!(exit.is_failure());
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let mut spawned = spawn("sleep 30");

        assert!(spawned.handle.stop(Duration::from_secs(5)));
        let exit = tokio::time::timeout(Duration::from_secs(3), spawned.exit)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit.signal, Some(15));
        assert!(!exit.is_failure());
    }

    #[tokio::test]
    async fn test_escalates_when_sigterm_is_ignored() {
        let mut spawned = spawn("trap '' TERM; while true; do sleep 0.05; done");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        assert!(spawned.handle.stop(Duration::from_millis(300)));
        assert!(!spawned.handle.stop(Duration::from_millis(300)));

        let exit = tokio::time::timeout(Duration::from_secs(5), spawned.exit)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit.signal, Some(9));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_missing_executable_is_a_spawn_error() {
        let config = SessionConfig {
            subprocess_path: "/nonexistent/ffmpeg".to_string(),
            ..SessionConfig::new("cam.local")
        };
        let target = RtspTarget::from_config(&config).unwrap();

        let result = ProcessSupervisor::new().start(&config, &target);

        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }
}
