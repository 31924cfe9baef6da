// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! The `/ws` multiplexer: one socket, any number of per-session
//! subscriptions.
//!
//! Output fan-out rides the registry's per-session broadcast channels; a
//! subscriber that cannot keep up is resynced with a fresh snapshot
//! instead of a replay, so the tailer is never blocked. Snapshots are
//! coalesced per subscription: one immediately on subscribe, then at most
//! one per [`SNAPSHOT_MIN_INTERVAL`] while the emulator keeps changing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vibetunnel_protocol::frame::{DataFrame, FrameKind};
use vibetunnel_protocol::ipc::Frame;

use crate::error::ErrorCode;
use crate::registry::{SessionEntry, SessionEvent};
use crate::transport::ws_msg::{event_json, ClientMessage, StreamKind};
use crate::transport::ServerState;

/// Minimum spacing between snapshots of one session to one client.
pub const SNAPSHOT_MIN_INTERVAL: Duration = Duration::from_millis(50);
/// Per-connection outbound queue; overflowing it triggers a resync.
pub const CLIENT_QUEUE: usize = 512;
/// Connections silent for this long are dropped (clients ping every ≤30s).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

/// Frames queued for one client.
enum Outbound {
    Frame(Bytes),
    /// Output backlog overflowed: replace it with a fresh snapshot.
    Resync(String),
}

/// One session's live subscription state on a connection.
struct Subscription {
    streams: HashSet<StreamKind>,
    output_cancel: Option<CancellationToken>,
    snapshot_cancel: Option<CancellationToken>,
}

impl Subscription {
    fn new() -> Self {
        Self { streams: HashSet::new(), output_cancel: None, snapshot_cancel: None }
    }

    fn close(&mut self) {
        if let Some(token) = self.output_cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.snapshot_cancel.take() {
            token.cancel();
        }
        self.streams.clear();
    }
}

async fn handle_connection(state: Arc<ServerState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(CLIENT_QUEUE);
    let mut events_rx = state.registry.subscribe_events();
    let mut subs: HashMap<String, Subscription> = HashMap::new();
    let mut last_activity = Instant::now();
    let mut idle_tick = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                last_activity = Instant::now();
                match msg {
                    Message::Text(text) => {
                        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                        let reply = match parsed {
                            Ok(client_msg) => {
                                handle_client_message(&state, &mut subs, &out_tx, client_msg).await
                            }
                            Err(_) => Some(DataFrame::error("", "invalid message")),
                        };
                        if let Some(frame) = reply {
                            if send_frame(&mut ws_tx, frame.encode()).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            outbound = out_rx.recv() => {
                let outbound = match outbound {
                    Some(o) => o,
                    None => break,
                };
                let bytes = match outbound {
                    Outbound::Frame(bytes) => bytes,
                    Outbound::Resync(id) => {
                        match state.registry.get(&id).await {
                            Some(entry) => snapshot_frame(&entry).await,
                            None => continue,
                        }
                    }
                };
                if send_frame(&mut ws_tx, bytes).await.is_err() {
                    break;
                }
            }
            event = events_rx.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("ws events subscriber lagged by {n}");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if handle_session_event(&mut subs, &mut ws_tx, &event).await.is_err() {
                    break;
                }
            }
            _ = idle_tick.tick() => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    debug!("closing idle ws connection");
                    break;
                }
            }
        }
    }

    for sub in subs.values_mut() {
        sub.close();
    }
}

/// Route a lifecycle event to this connection's subscriptions.
///
/// Exit and removal close the subscription (after a final event frame for
/// `events` subscribers).
async fn handle_session_event<S>(
    subs: &mut HashMap<String, Subscription>,
    ws_tx: &mut S,
    event: &SessionEvent,
) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let id = event.session_id().to_owned();
    let Some(sub) = subs.get_mut(&id) else { return Ok(()) };

    if sub.streams.contains(&StreamKind::Events) {
        if let Some(payload) = event_json(event) {
            let frame = DataFrame::new(
                FrameKind::Event,
                id.clone(),
                Bytes::from(payload.to_string().into_bytes()),
            );
            send_frame(ws_tx, frame.encode()).await?;
        }
    }

    if matches!(event, SessionEvent::Exited { .. } | SessionEvent::Removed { .. }) {
        sub.close();
        subs.remove(&id);
    }
    Ok(())
}

/// Handle one parsed control message; returns an optional direct reply.
async fn handle_client_message(
    state: &Arc<ServerState>,
    subs: &mut HashMap<String, Subscription>,
    out_tx: &mpsc::Sender<Outbound>,
    msg: ClientMessage,
) -> Option<DataFrame> {
    match msg {
        ClientMessage::Subscribe { session_id, streams } => {
            let Some(entry) = state.registry.get(&session_id).await else {
                return Some(not_found(&session_id));
            };
            let sub = subs.entry(session_id.clone()).or_insert_with(Subscription::new);
            for stream in streams {
                if !sub.streams.insert(stream) {
                    continue;
                }
                match stream {
                    StreamKind::Output if sub.output_cancel.is_none() => {
                        let token = CancellationToken::new();
                        spawn_output_forwarder(
                            Arc::clone(&entry),
                            out_tx.clone(),
                            token.clone(),
                        );
                        sub.output_cancel = Some(token);
                    }
                    StreamKind::Snapshot if sub.snapshot_cancel.is_none() => {
                        let token = CancellationToken::new();
                        spawn_snapshot_task(Arc::clone(&entry), out_tx.clone(), token.clone());
                        sub.snapshot_cancel = Some(token);
                    }
                    // `events` frames are routed by the connection loop.
                    _ => {}
                }
            }
            None
        }

        ClientMessage::Unsubscribe { session_id, streams } => {
            if let Some(sub) = subs.get_mut(&session_id) {
                for stream in streams {
                    sub.streams.remove(&stream);
                    match stream {
                        StreamKind::Output => {
                            if let Some(token) = sub.output_cancel.take() {
                                token.cancel();
                            }
                        }
                        StreamKind::Snapshot => {
                            if let Some(token) = sub.snapshot_cancel.take() {
                                token.cancel();
                            }
                        }
                        StreamKind::Events => {}
                    }
                }
                if sub.streams.is_empty() {
                    subs.remove(&session_id);
                }
            }
            None
        }

        ClientMessage::Input { session_id, data } => {
            let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&data) else {
                return Some(DataFrame::error(&session_id, "invalid base64 input"));
            };
            route_ipc(state, &session_id, Frame::stdin(bytes)).await
        }

        ClientMessage::Resize { session_id, cols, rows } => {
            if cols == 0 || rows == 0 {
                return Some(DataFrame::error(&session_id, "cols and rows must be positive"));
            }
            route_ipc(state, &session_id, Frame::resize(cols, rows)).await
        }

        ClientMessage::ResetSize { session_id } => {
            route_ipc(state, &session_id, Frame::reset_size()).await
        }

        ClientMessage::Kill { session_id, signal } => {
            route_ipc(state, &session_id, Frame::kill(signal)).await
        }

        ClientMessage::Rename { session_id, name } => {
            route_ipc(state, &session_id, Frame::update_title(&name)).await
        }

        ClientMessage::Ping => Some(DataFrame::pong()),
    }
}

/// Forward a control frame to the session's forwarder over IPC.
async fn route_ipc(
    state: &Arc<ServerState>,
    session_id: &str,
    frame: Frame,
) -> Option<DataFrame> {
    let Some(entry) = state.registry.get(session_id).await else {
        return Some(not_found(session_id));
    };
    match entry.ipc.send(frame).await {
        Ok(()) => None,
        Err(e) => Some(DataFrame::error(session_id, &format!("{}: {e:#}", ErrorCode::Internal))),
    }
}

fn not_found(session_id: &str) -> DataFrame {
    DataFrame::error(session_id, &format!("{}: unknown session", ErrorCode::NotFound))
}

async fn send_frame<S>(ws_tx: &mut S, bytes: Bytes) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    ws_tx.send(Message::Binary(bytes)).await.map_err(|_| ())
}

async fn snapshot_frame(entry: &SessionEntry) -> Bytes {
    let payload = entry.snapshot().await;
    DataFrame::new(FrameKind::Snapshot, entry.id.clone(), payload).encode()
}

/// Forward raw output chunks. Strict FIFO per session; when the client
/// queue overflows or the broadcast lags, the backlog collapses into one
/// resync snapshot.
fn spawn_output_forwarder(
    entry: Arc<SessionEntry>,
    out_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
) {
    let mut output_rx = entry.subscribe_output();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = output_rx.recv() => received,
            };
            match received {
                Ok(bytes) => {
                    let frame =
                        DataFrame::new(FrameKind::Output, entry.id.clone(), bytes).encode();
                    match out_tx.try_send(Outbound::Frame(frame)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            if out_tx.send(Outbound::Resync(entry.id.clone())).await.is_err() {
                                break;
                            }
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if out_tx.send(Outbound::Resync(entry.id.clone())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Send one snapshot immediately, then one per change burst, spaced at
/// least [`SNAPSHOT_MIN_INTERVAL`] apart.
fn spawn_snapshot_task(
    entry: Arc<SessionEntry>,
    out_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
) {
    let mut updates = entry.subscribe_updates();
    tokio::spawn(async move {
        updates.mark_changed();
        loop {
            let changed = tokio::select! {
                _ = cancel.cancelled() => break,
                changed = updates.changed() => changed,
            };
            if changed.is_err() {
                break;
            }
            let frame = snapshot_frame(&entry).await;
            if out_tx.send(Outbound::Frame(frame)).await.is_err() {
                break;
            }
            tokio::time::sleep(SNAPSHOT_MIN_INTERVAL).await;
        }
    });
}
