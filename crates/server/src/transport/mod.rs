// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! HTTP + WebSocket surface.

pub mod http;
pub mod ws;
pub mod ws_msg;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::registry::Registry;

/// Shared state behind every handler.
pub struct ServerState {
    pub registry: Arc<Registry>,
    pub config: Config,
    /// Set during shutdown; mutating requests answer 503.
    pub draining: AtomicBool,
}

impl ServerState {
    pub fn new(registry: Arc<Registry>, config: Config) -> Arc<Self> {
        Arc::new(Self { registry, config, draining: AtomicBool::new(false) })
    }
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/sessions", get(http::list_sessions).post(http::create_session))
        .route("/api/sessions/{id}", delete(http::kill_session))
        .route("/api/sessions/{id}/input", post(http::send_input))
        .route("/api/sessions/{id}/resize", post(http::resize_session))
        .route("/api/sessions/{id}/text", get(http::session_text))
        .route("/api/sessions/{id}/snapshot", get(http::session_snapshot))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
