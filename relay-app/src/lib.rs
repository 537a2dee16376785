//! RTSP relay host.
//!
//! Loads the configured sessions into a relay handler, serves HTTP-mode
//! sessions and the control API over axum, and shuts every session down
//! on Ctrl-C.

pub mod config;
mod pipeline;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_engine::{RelayHandler, SessionMode};
use relay_ipc::{event_channel, RelayEvent};

pub use config::RelayConfig;
pub use pipeline::{run_pipeline, PipelineStats};
pub use routes::router;

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "rtsp_relay=debug,relay_engine=debug,relay_process=debug,relay_ipc=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Register every configured session with a new handler.
pub fn build_handler(config: &RelayConfig) -> Arc<RelayHandler> {
    let (event_tx, event_rx) = event_channel();
    spawn_event_logger(event_rx);

    let handler = Arc::new(RelayHandler::new(Some(event_tx)));
    for entry in &config.sessions {
        let options = entry.options();
        match entry.mode {
            SessionMode::Direct => {
                let frames = handler.add_direct(entry.id.clone(), entry.config.clone(), options);
                tokio::spawn(run_pipeline(entry.id.clone(), frames));
            }
            SessionMode::Http => {
                handler.add_http(entry.id.clone(), entry.config.clone(), options);
            }
        }
    }

    handler
}

/// Log session events off the async runtime.
fn spawn_event_logger(events: Receiver<RelayEvent>) {
    thread::spawn(move || {
        for event in events {
            match event {
                RelayEvent::StateChanged {
                    session,
                    previous,
                    current,
                } => debug!(%session, %previous, %current, "Session state changed"),
                RelayEvent::Status { session, status } => {
                    debug!(%session, label = %status.label, "Session status")
                }
                RelayEvent::Error { session, message } => warn!(%session, "Session error: {}", message),
            }
        }
        debug!("Event channel closed");
    });
}

/// Serve until Ctrl-C, then shut every session down.
pub async fn run(config: RelayConfig) -> Result<()> {
    info!(sessions = config.sessions.len(), "RTSP relay starting");

    let handler = build_handler(&config);
    let app = router(Arc::clone(&handler));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Listening on {}", config.listen);

    // Sessions must stop before the server drains, or open streams never end.
    let shutdown_handler = Arc::clone(&handler);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutdown requested");
            shutdown_handler.shutdown().await;
        })
        .await
        .context("HTTP server failed")?;

    info!("RTSP relay stopped");
    Ok(())
}
