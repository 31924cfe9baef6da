// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! REST surface: thin wrappers around the registry and the per-session
//! IPC sockets.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};

use vibetunnel_protocol::ipc::Frame;
use vibetunnel_protocol::session::{self, SessionRecord, SessionStatus, TitleMode};

use crate::error::{ApiError, ErrorCode};
use crate::registry::SessionEntry;
use crate::spawn;
use crate::transport::ServerState;

/// How long session creation waits for the forwarder to materialize its
/// session directory.
const CREATE_DEADLINE: Duration = Duration::from_secs(2);

/// `GET /api/sessions`
pub async fn list_sessions(State(state): State<Arc<ServerState>>) -> Json<Vec<SessionRecord>> {
    Json(state.registry.list().await)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub command: Vec<String>,
    pub working_dir: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
    #[serde(default)]
    pub title_mode: Option<TitleMode>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// `POST /api/sessions` — spawn a new forwarder-backed session.
pub async fn create_session(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    reject_draining(&state)?;
    if req.command.is_empty() {
        return Err(ApiError::new(ErrorCode::BadRequest, "command must not be empty"));
    }

    let id = match &req.session_id {
        Some(id) => {
            if !session::is_valid_id(id) {
                return Err(ApiError::new(ErrorCode::BadRequest, format!("invalid id {id:?}")));
            }
            if state.registry.contains(id).await
                || session::session_dir(state.registry.control_dir(), id).exists()
            {
                return Err(ApiError::new(ErrorCode::Conflict, format!("session {id} exists")));
            }
            id.clone()
        }
        None => session::generate_id(),
    };

    spawn::spawn_forwarder(&state.config, &id, &req)
        .await
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("spawn failed: {e:#}")))?;

    // The watcher picks the directory up on its next scan; wait just long
    // enough to report startup failures as errors rather than ghosts.
    let dir = session::session_dir(state.registry.control_dir(), &id);
    let deadline = tokio::time::Instant::now() + CREATE_DEADLINE;
    while !dir.join(session::SESSION_FILE).exists() {
        if tokio::time::Instant::now() >= deadline {
            return Err(ApiError::new(
                ErrorCode::Internal,
                format!("forwarder did not start session {id}"),
            ));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    Ok(Json(CreateSessionResponse { session_id: id }))
}

/// `DELETE /api/sessions/{id}` — deliver the default kill signal.
/// Idempotent: killing an exited session is a no-op.
pub async fn kill_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    reject_draining(&state)?;
    let entry = require_session(&state, &id).await?;
    if entry.record.read().await.status == SessionStatus::Exited {
        return Ok(Json(serde_json::json!({ "killed": false, "status": "exited" })));
    }
    entry
        .ipc
        .send(Frame::kill(None))
        .await
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("kill failed: {e:#}")))?;
    Ok(Json(serde_json::json!({ "killed": true })))
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    /// Plain text input.
    #[serde(default)]
    pub text: Option<String>,
    /// Base64 input for binary-unsafe payloads.
    #[serde(default)]
    pub data: Option<String>,
}

/// `POST /api/sessions/{id}/input`
pub async fn send_input(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(req): Json<InputRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    reject_draining(&state)?;
    let entry = require_session(&state, &id).await?;

    let bytes = match (req.text, req.data) {
        (Some(text), None) => text.into_bytes(),
        (None, Some(data)) => base64::engine::general_purpose::STANDARD
            .decode(&data)
            .map_err(|_| ApiError::new(ErrorCode::BadRequest, "invalid base64 data"))?,
        _ => {
            return Err(ApiError::new(
                ErrorCode::BadRequest,
                "exactly one of text or data is required",
            ));
        }
    };

    entry
        .ipc
        .send(Frame::stdin(bytes))
        .await
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("input failed: {e:#}")))?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// `POST /api/sessions/{id}/resize`
pub async fn resize_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(req): Json<ResizeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    reject_draining(&state)?;
    if req.cols == 0 || req.rows == 0 {
        return Err(ApiError::new(ErrorCode::BadRequest, "cols and rows must be positive"));
    }
    let entry = require_session(&state, &id).await?;
    entry
        .ipc
        .send(Frame::resize(req.cols, req.rows))
        .await
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("resize failed: {e:#}")))?;
    Ok(Json(serde_json::json!({ "cols": req.cols, "rows": req.rows })))
}

/// `GET /api/sessions/{id}/text` — render the current grid as plain text.
pub async fn session_text(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<String, ApiError> {
    let entry = require_session(&state, &id).await?;
    Ok(entry.text().await)
}

/// `GET /api/sessions/{id}/snapshot` — the binary grid snapshot.
pub async fn session_snapshot(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = require_session(&state, &id).await?;
    let payload = entry.snapshot().await;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], payload))
}

async fn require_session(state: &ServerState, id: &str) -> Result<Arc<SessionEntry>, ApiError> {
    state.registry.get(id).await.ok_or_else(|| ApiError::not_found(id))
}

fn reject_draining(state: &ServerState) -> Result<(), ApiError> {
    if state.draining.load(Ordering::Acquire) {
        return Err(ApiError::new(ErrorCode::Draining, "server is shutting down"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
