// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! REST handler tests over `axum_test::TestServer` — no real TCP needed.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use clap::Parser;

use super::*;
use crate::registry::Registry;
use crate::transport::{build_router, ServerState};
use vibetunnel_protocol::snapshot;

fn test_state(control_dir: &std::path::Path) -> Arc<ServerState> {
    let config = match crate::config::Config::try_parse_from([
        "vibetunnel-server",
        "--control-dir",
        &control_dir.display().to_string(),
    ]) {
        Ok(config) => config,
        Err(e) => unreachable!("config parse failed: {e}"),
    };
    let registry = Registry::new(control_dir.to_path_buf(), 100);
    ServerState::new(registry, config)
}

fn test_server(state: Arc<ServerState>) -> anyhow::Result<TestServer> {
    TestServer::new(build_router(state)).map_err(|e| anyhow::anyhow!("test server: {e}"))
}

fn record(id: &str, status: SessionStatus) -> SessionRecord {
    let mut record = SessionRecord::new(
        id.to_owned(),
        id.to_owned(),
        vec!["sh".to_owned()],
        "/".to_owned(),
    );
    record.status = status;
    record.initial_cols = Some(20);
    record.initial_rows = Some(5);
    record
}

#[tokio::test]
async fn list_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = test_server(test_state(dir.path()))?;

    let resp = server.get("/api/sessions").await;
    resp.assert_status(StatusCode::OK);
    let sessions: Vec<SessionRecord> = resp.json();
    assert!(sessions.is_empty());
    Ok(())
}

#[tokio::test]
async fn list_returns_seeded_sessions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    state.registry.insert(record("a", SessionStatus::Running), dir.path().join("a")).await;
    let server = test_server(state)?;

    let sessions: Vec<SessionRecord> = server.get("/api/sessions").await.json();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "a");
    Ok(())
}

#[tokio::test]
async fn unknown_session_is_404_with_json_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = test_server(test_state(dir.path()))?;

    for path in
        ["/api/sessions/ghost/text", "/api/sessions/ghost/snapshot"]
    {
        let resp = server.get(path).await;
        resp.assert_status(StatusCode::NOT_FOUND);
        let body: serde_json::Value = resp.json();
        assert_eq!(body["error"], "NOT_FOUND");
        assert!(body["message"].as_str().is_some_and(|m| m.contains("ghost")));
    }

    let resp = server.delete("/api/sessions/ghost").await;
    resp.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn text_renders_the_grid() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    let entry =
        state.registry.insert(record("t", SessionStatus::Running), dir.path().join("t")).await;
    entry.terminal.write().await.feed(b"ping says hi");

    let server = test_server(state)?;
    let resp = server.get("/api/sessions/t/text").await;
    resp.assert_status(StatusCode::OK);
    assert!(resp.text().contains("ping says hi"));
    Ok(())
}

#[tokio::test]
async fn snapshot_is_decodable_binary() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    let entry =
        state.registry.insert(record("s", SessionStatus::Running), dir.path().join("s")).await;
    entry.terminal.write().await.feed(b"hello");

    let server = test_server(state)?;
    let resp = server.get("/api/sessions/s/snapshot").await;
    resp.assert_status(StatusCode::OK);

    let snap = snapshot::decode(&resp.as_bytes())?;
    assert_eq!(snap.cols, 20);
    assert_eq!(snap.rows, 5);
    let first: String = snap.grid_rows[0].cells[..5].iter().map(|c| c.ch).collect();
    assert_eq!(first, "hello");
    Ok(())
}

#[tokio::test]
async fn input_requires_exactly_one_payload_field() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    state.registry.insert(record("i", SessionStatus::Running), dir.path().join("i")).await;
    let server = test_server(state)?;

    let resp = server
        .post("/api/sessions/i/input")
        .json(&serde_json::json!({ "text": "a", "data": "YQ==" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let resp = server
        .post("/api/sessions/i/input")
        .json(&serde_json::json!({ "data": "not base64!!!" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn resize_rejects_zero_dimensions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    state.registry.insert(record("r", SessionStatus::Running), dir.path().join("r")).await;
    let server = test_server(state)?;

    let resp = server
        .post("/api/sessions/r/resize")
        .json(&serde_json::json!({ "cols": 0, "rows": 30 }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn kill_on_exited_session_is_a_noop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    let mut dead = record("k", SessionStatus::Exited);
    dead.exit_code = Some(0);
    state.registry.insert(dead, dir.path().join("k")).await;
    let server = test_server(state)?;

    let resp = server.delete("/api/sessions/k").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["killed"], false);
    Ok(())
}

#[tokio::test]
async fn create_rejects_empty_command() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let server = test_server(test_state(dir.path()))?;

    let resp = server
        .post("/api/sessions")
        .json(&serde_json::json!({ "command": [], "workingDir": "/" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn create_conflicts_on_reserved_id() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    state.registry.insert(record("taken", SessionStatus::Running), dir.path().join("taken")).await;
    let server = test_server(state)?;

    let resp = server
        .post("/api/sessions")
        .json(&serde_json::json!({
            "command": ["sh"],
            "workingDir": "/",
            "sessionId": "taken",
        }))
        .await;
    resp.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn draining_server_answers_503() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let state = test_state(dir.path());
    state.draining.store(true, Ordering::Release);
    let server = test_server(state)?;

    let resp = server
        .post("/api/sessions")
        .json(&serde_json::json!({ "command": ["sh"], "workingDir": "/" }))
        .await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "DRAINING");
    Ok(())
}
