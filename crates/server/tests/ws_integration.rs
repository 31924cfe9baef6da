// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! WebSocket multiplexer integration: a real listener, a seeded control
//! directory, and a tokio-tungstenite client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use vibetunnel_protocol::frame::{DataFrame, FrameKind};
use vibetunnel_protocol::ipc::{IpcCodec, MessageType};
use vibetunnel_protocol::snapshot;

use vibetunnel_server::config::Config;
use vibetunnel_server::registry::Registry;
use vibetunnel_server::transport::{build_router, ServerState};
use vibetunnel_server::watcher::ControlDirWatcher;

struct Harness {
    control: tempfile::TempDir,
    state: Arc<ServerState>,
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
}

async fn start_server() -> anyhow::Result<Harness> {
    let control = tempfile::tempdir()?;
    let config = Config::try_parse_from([
        "vibetunnel-server",
        "--control-dir",
        &control.path().display().to_string(),
    ])
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let registry = Registry::new(control.path().to_path_buf(), 500);
    let state = ServerState::new(Arc::clone(&registry), config);
    let shutdown = CancellationToken::new();

    let watcher = ControlDirWatcher::new(registry).with_poll_interval(Duration::from_millis(25));
    tokio::spawn(watcher.run(shutdown.child_token()));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = build_router(Arc::clone(&state));
    let sd = shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
    });

    Ok(Harness { control, state, addr, shutdown })
}

fn seed_session(control: &Path, id: &str) -> anyhow::Result<std::path::PathBuf> {
    let dir = control.join(id);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(
        dir.join("session.json"),
        format!(
            r#"{{"id":"{id}","name":"{id}","command":["sh"],"workingDir":"/","status":"running","startedAt":"2026-01-01T00:00:00Z","initialCols":20,"initialRows":5}}"#
        ),
    )?;
    std::fs::write(
        dir.join("stdout"),
        concat!(
            "{\"version\":2,\"width\":20,\"height\":5}\n",
            "[0.0,\"o\",\"hello\"]\n",
        ),
    )?;
    Ok(dir)
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(addr: std::net::SocketAddr) -> anyhow::Result<WsClient> {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await?;
    Ok(socket)
}

async fn send_json(socket: &mut WsClient, value: serde_json::Value) -> anyhow::Result<()> {
    socket.send(WsMessage::Text(value.to_string().into())).await?;
    Ok(())
}

/// Read binary data frames until one matches, with a timeout.
async fn next_matching(
    socket: &mut WsClient,
    mut want: impl FnMut(&DataFrame) -> bool,
) -> anyhow::Result<DataFrame> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let msg = socket
                .next()
                .await
                .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
            if let WsMessage::Binary(bytes) = msg {
                let frame = DataFrame::decode(&bytes)?;
                if want(&frame) {
                    return Ok(frame);
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for a matching frame"))?
}

async fn wait_for_session(state: &ServerState, id: &str) -> anyhow::Result<()> {
    for _ in 0..200 {
        if state.registry.contains(id).await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("watcher never picked up session {id}")
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_gets_snapshot_then_output() -> anyhow::Result<()> {
    let harness = start_server().await?;
    let dir = seed_session(harness.control.path(), "w1")?;
    wait_for_session(&harness.state, "w1").await?;

    let mut socket = connect(harness.addr).await?;
    send_json(
        &mut socket,
        serde_json::json!({
            "type": "subscribe",
            "sessionId": "w1",
            "streams": ["output", "snapshot", "events"],
        }),
    )
    .await?;

    // Immediate snapshot on subscribe, reflecting the tailed backlog.
    let frame = next_matching(&mut socket, |f| f.kind == FrameKind::Snapshot).await?;
    assert_eq!(frame.session_id, "w1");
    let snap = snapshot::decode(&frame.payload)?;
    assert_eq!(snap.cols, 20);
    assert_eq!(snap.rows, 5);

    // Fresh output flows as OUTPUT frames.
    let mut stdout = std::fs::OpenOptions::new().append(true).open(dir.join("stdout"))?;
    std::io::Write::write_all(&mut stdout, b"[0.5,\"o\",\"live!\"]\n")?;

    let frame = next_matching(&mut socket, |f| f.kind == FrameKind::Output).await?;
    assert!(String::from_utf8_lossy(&frame.payload).contains("live!"));

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_pong_and_unknown_session_error() -> anyhow::Result<()> {
    let harness = start_server().await?;
    let mut socket = connect(harness.addr).await?;

    send_json(&mut socket, serde_json::json!({ "type": "ping" })).await?;
    let frame = next_matching(&mut socket, |f| f.kind == FrameKind::Pong).await?;
    assert!(frame.payload.is_empty());

    send_json(
        &mut socket,
        serde_json::json!({
            "type": "subscribe",
            "sessionId": "ghost",
            "streams": ["output"],
        }),
    )
    .await?;
    let frame = next_matching(&mut socket, |f| f.kind == FrameKind::Error).await?;
    assert!(String::from_utf8_lossy(&frame.payload).contains("NOT_FOUND"));

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn input_is_routed_to_the_session_ipc_socket() -> anyhow::Result<()> {
    let harness = start_server().await?;
    let dir = seed_session(harness.control.path(), "w2")?;
    wait_for_session(&harness.state, "w2").await?;

    // Stand in for the forwarder on the session's control socket.
    let listener = tokio::net::UnixListener::bind(dir.join("ipc.sock"))?;
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut framed = tokio_util::codec::Framed::new(stream, IpcCodec);
        let frame = framed
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
        anyhow::Ok(frame)
    });

    let mut socket = connect(harness.addr).await?;
    send_json(
        &mut socket,
        serde_json::json!({
            "type": "input",
            "sessionId": "w2",
            "data": "cGluZwo=", // "ping\n"
        }),
    )
    .await?;

    let frame = tokio::time::timeout(Duration::from_secs(5), accept).await???;
    assert_eq!(frame.kind, MessageType::StdinData);
    assert_eq!(&frame.payload[..], b"ping\n");

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn session_exit_reaches_event_subscribers() -> anyhow::Result<()> {
    let harness = start_server().await?;
    let dir = seed_session(harness.control.path(), "w3")?;
    wait_for_session(&harness.state, "w3").await?;

    let mut socket = connect(harness.addr).await?;
    send_json(
        &mut socket,
        serde_json::json!({
            "type": "subscribe",
            "sessionId": "w3",
            "streams": ["events"],
        }),
    )
    .await?;
    // Let the subscription land before the exit fires.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut stdout = std::fs::OpenOptions::new().append(true).open(dir.join("stdout"))?;
    std::io::Write::write_all(&mut stdout, b"[1.0,\"x\",\"143 w3\"]\n")?;

    let frame = next_matching(&mut socket, |f| f.kind == FrameKind::Event).await?;
    assert_eq!(frame.session_id, "w3");
    let payload: serde_json::Value = serde_json::from_slice(&frame.payload)?;
    assert_eq!(payload["kind"], "session-exit");
    assert_eq!(payload["exitCode"], 143);

    harness.shutdown.cancel();
    Ok(())
}
