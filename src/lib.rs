//! vigilant -- multi-detector severity fusion and rate-limited alerting.
//!
//! This crate fuses per-frame detections from several concurrent detectors
//! into a sliding-window severity assessment, escalates sustained activity,
//! and fans alerts out to independently rate-limited channels.

pub mod alert;
pub mod api;
pub mod config;
pub mod detect;
pub mod monitor;
pub mod source;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::monitor::{Monitor, RunSummary};
use crate::source::DetectionSource;

/// Run the monitor over `source`, optionally serving the status API on
/// `bind`, until the source ends or `shutdown` is cancelled.
pub async fn run(
    config: Config,
    source: &mut dyn DetectionSource,
    bind: Option<&str>,
    shutdown: CancellationToken,
) -> Result<RunSummary> {
    // 1. Reject bad settings before anything starts
    config.validate().context("invalid configuration")?;

    // 2. Channels + monitor (spawns dispatch workers)
    let channels = alert::build_channels(&config.channels)?;
    tracing::info!(
        channels = ?config.channels.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        "alert channels ready"
    );
    let monitor = Monitor::new(&config, channels);

    // 3. Status API (background task)
    let api_token = shutdown.child_token();
    let server = match bind {
        Some(bind) => {
            let addr: std::net::SocketAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address: {}", bind))?;
            let app = api::router(api::state::AppState {
                monitor: monitor.handle(),
            });
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            tracing::info!(%addr, "status API listening");
            let token = api_token.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    // 4. Fusion loop (foreground)
    let result = monitor.run(source, shutdown).await;

    api_token.cancel();
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "status API stopped with error"),
            Err(e) => tracing::warn!(error = %e, "status API task failed"),
            Ok(Ok(())) => {}
        }
    }

    Ok(result?)
}
