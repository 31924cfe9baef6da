// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Server startup wiring: registry, control-directory watcher, HTTP/WS
//! listener, and shutdown handling.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::registry::Registry;
use crate::transport::{build_router, ServerState};
use crate::watcher::ControlDirWatcher;

/// Outstanding writes get this long after the shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / VIBETUNNEL_LOG_LEVEL > RUST_LOG > default.
    let filter = if std::env::var("VIBETUNNEL_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the server until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    let control_dir = config.control_dir();
    std::fs::create_dir_all(&control_dir)
        .with_context(|| format!("creating control dir {}", control_dir.display()))?;

    let registry = Registry::new(control_dir, config.scrollback);
    let shutdown = CancellationToken::new();
    let state = ServerState::new(Arc::clone(&registry), config.clone());

    // Watcher: the registry's single writer.
    tokio::spawn(ControlDirWatcher::new(Arc::clone(&registry)).run(shutdown.child_token()));

    let router = build_router(Arc::clone(&state));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!("listening on {}", listener.local_addr()?);

    // Signal handling: first signal drains, a second one forces exit.
    {
        let sd = shutdown.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                }
            }
            state.draining.store(true, Ordering::Release);
            sd.cancel();

            tokio::select! {
                _ = tokio::time::sleep(DRAIN_DEADLINE) => {
                    info!("drain deadline reached, exiting");
                }
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM again, forcing exit");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT again, forcing exit");
                }
            }
            std::process::exit(0);
        });
    }

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
    if let Err(e) = result {
        error!("server error: {e}");
        return Err(e.into());
    }
    Ok(())
}
