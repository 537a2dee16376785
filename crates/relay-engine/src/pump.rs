//! Tasks that turn subprocess streams into session mailbox events.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relay_process::ProcessExit;

use crate::session::{ProcessEvent, SessionMessage};
use crate::sink::ClosedFuture;

/// Read size for media output.
const OUTPUT_CHUNK: usize = 64 * 1024;

/// Read size for diagnostic output.
const DIAGNOSTIC_CHUNK: usize = 4 * 1024;

/// How long the exit report waits for trailing diagnostics.
const DIAGNOSTIC_DRAIN: Duration = Duration::from_millis(250);

type Mailbox = mpsc::UnboundedSender<SessionMessage>;

fn post(mailbox: &Mailbox, generation: u64, event: ProcessEvent) -> bool {
    mailbox
        .send(SessionMessage::Process { generation, event })
        .is_ok()
}

/// Drain media output. Each read becomes one output chunk.
pub(crate) async fn pump_output<R>(mut stdout: R, generation: u64, mailbox: Mailbox)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(OUTPUT_CHUNK);

    loop {
        buf.reserve(OUTPUT_CHUNK);
        match stdout.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !post(&mailbox, generation, ProcessEvent::Output(buf.split().freeze())) {
                    break;
                }
            }
            Err(e) => {
                warn!(generation, "Output read failed: {}", e);
                break;
            }
        }
    }

    debug!(generation, "Output stream closed");
}

/// Drain diagnostic output as lossy UTF-8 text.
pub(crate) async fn pump_diagnostics<R>(mut stderr: R, generation: u64, mailbox: Mailbox)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; DIAGNOSTIC_CHUNK];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if !post(&mailbox, generation, ProcessEvent::Diagnostic(text)) {
                    break;
                }
            }
            Err(e) => {
                warn!(generation, "Diagnostic read failed: {}", e);
                break;
            }
        }
    }
}

/// Report the exit once trailing diagnostics have been posted.
pub(crate) async fn forward_exit(
    exit: oneshot::Receiver<ProcessExit>,
    diagnostics: JoinHandle<()>,
    generation: u64,
    mailbox: Mailbox,
) {
    let exit = exit.await.unwrap_or(ProcessExit {
        code: None,
        signal: None,
    });

    if tokio::time::timeout(DIAGNOSTIC_DRAIN, diagnostics).await.is_err() {
        debug!(generation, "Diagnostic stream still open after exit");
    }

    post(&mailbox, generation, ProcessEvent::Exit(exit));
}

/// Report when the sink's consumer goes away.
pub(crate) async fn watch_sink(closed: ClosedFuture, generation: u64, mailbox: Mailbox) {
    closed.await;
    let _ = mailbox.send(SessionMessage::SinkClosed { generation });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_chunks_are_posted_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let data: &[u8] = b"frame-bytes";

        pump_output(data, 7, tx).await;

        match rx.recv().await {
            Some(SessionMessage::Process {
                generation: 7,
                event: ProcessEvent::Output(chunk),
            }) => assert_eq!(&chunk[..], b"frame-bytes"),
            _ => panic!("expected an output chunk"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_diagnostics_are_lossy_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let data: &[u8] = b"401 Unauthorized \xff";

        pump_diagnostics(data, 1, tx).await;

        match rx.recv().await {
            Some(SessionMessage::Process {
                event: ProcessEvent::Diagnostic(text),
                ..
            }) => assert!(text.starts_with("401 Unauthorized")),
            _ => panic!("expected diagnostic text"),
        }
    }

    #[tokio::test]
    async fn test_exit_follows_diagnostics() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let data: &'static [u8] = b"Connection refused";
        let diagnostics = tokio::spawn(pump_diagnostics(data, 2, tx.clone()));

        exit_tx
            .send(ProcessExit {
                code: Some(1),
                signal: None,
            })
            .unwrap();
        forward_exit(exit_rx, diagnostics, 2, tx).await;

        assert!(matches!(
            rx.recv().await,
            Some(SessionMessage::Process {
                event: ProcessEvent::Diagnostic(_),
                ..
            })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(SessionMessage::Process {
                event: ProcessEvent::Exit(ProcessExit { code: Some(1), .. }),
                ..
            })
        ));
    }
}
