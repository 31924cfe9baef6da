// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! In-memory index of known sessions.
//!
//! The control-directory watcher is the single writer; everything else
//! reads. Each entry carries the session's render state (terminal grid),
//! its output fan-out channel, and the shared IPC connection back to the
//! forwarder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vibetunnel_protocol::session::{SessionRecord, SessionStatus, IPC_SOCKET};
use vibetunnel_protocol::snapshot;

use crate::ipc_client::IpcClient;
use crate::term::Terminal;

/// Per-subscriber output backlog before a lagging client is resynced with
/// a fresh snapshot instead of replayed bytes.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 512;

/// Lifecycle events fanned out to the transport layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Appeared { id: String },
    Updated { id: String },
    Removed { id: String },
    Exited { id: String, exit_code: i32 },
    Renamed { id: String, name: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Appeared { id }
            | Self::Updated { id }
            | Self::Removed { id }
            | Self::Exited { id, .. }
            | Self::Renamed { id, .. } => id,
        }
    }
}

/// One known session.
pub struct SessionEntry {
    pub id: String,
    pub dir: PathBuf,
    pub record: RwLock<SessionRecord>,
    pub terminal: RwLock<Terminal>,
    /// Raw output fan-out; subscribers that lag are resynced via snapshot.
    pub output_tx: broadcast::Sender<Bytes>,
    /// Emulator change counter for snapshot coalescing.
    pub update_tx: watch::Sender<u64>,
    pub last_clear_offset: AtomicU64,
    pub ipc: IpcClient,
    pub tail_cancel: CancellationToken,
    exit_emitted: AtomicBool,
}

impl SessionEntry {
    fn new(record: SessionRecord, dir: PathBuf, scrollback: usize) -> Arc<Self> {
        let cols = record.initial_cols.unwrap_or(80);
        let rows = record.initial_rows.unwrap_or(24);
        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (update_tx, _) = watch::channel(0);
        let last_clear = record.clear_offset();
        let ipc = IpcClient::new(dir.join(IPC_SOCKET));
        Arc::new(Self {
            id: record.id.clone(),
            dir,
            record: RwLock::new(record),
            terminal: RwLock::new(Terminal::new(cols, rows, scrollback)),
            output_tx,
            update_tx,
            last_clear_offset: AtomicU64::new(last_clear),
            ipc,
            tail_cancel: CancellationToken::new(),
            exit_emitted: AtomicBool::new(false),
        })
    }

    /// Encode the current grid as a `SNAPSHOT_VT` payload.
    pub async fn snapshot(&self) -> Bytes {
        snapshot::encode(self.terminal.read().await.grid())
    }

    pub async fn text(&self) -> String {
        self.terminal.read().await.text()
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<Bytes> {
        self.output_tx.subscribe()
    }

    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.update_tx.subscribe()
    }
}

pub struct Registry {
    control_dir: PathBuf,
    scrollback: usize,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Registry {
    pub fn new(control_dir: PathBuf, scrollback: usize) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            control_dir,
            scrollback,
            sessions: RwLock::new(HashMap::new()),
            events_tx,
        })
    }

    pub fn control_dir(&self) -> &PathBuf {
        &self.control_dir
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Session records ordered by `startedAt` descending (RFC 3339 strings
    /// sort chronologically).
    pub async fn list(&self) -> Vec<SessionRecord> {
        let sessions = self.sessions.read().await;
        let mut records = Vec::with_capacity(sessions.len());
        for entry in sessions.values() {
            records.push(entry.record.read().await.clone());
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Control-socket path for an id, regardless of liveness.
    pub fn ipc_path(&self, id: &str) -> PathBuf {
        self.control_dir.join(id).join(IPC_SOCKET)
    }

    /// Watcher: a new session directory appeared.
    pub async fn insert(&self, record: SessionRecord, dir: PathBuf) -> Arc<SessionEntry> {
        let id = record.id.clone();
        let already_exited = record.status == SessionStatus::Exited;
        let entry = SessionEntry::new(record, dir, self.scrollback);
        self.sessions.write().await.insert(id.clone(), Arc::clone(&entry));
        info!("session appeared: {id}");
        let _ = self.events_tx.send(SessionEvent::Appeared { id });
        if already_exited {
            // Seen first in its terminal state; no exit event fires later.
            entry.exit_emitted.store(true, Ordering::Release);
        }
        entry
    }

    /// Watcher: `session.json` changed. Diffs the record and emits the
    /// matching events.
    pub async fn apply_update(&self, id: &str, new_record: SessionRecord) {
        let Some(entry) = self.get(id).await else { return };

        let (name_changed, became_exited, exit_code) = {
            let mut record = entry.record.write().await;
            let name_changed = record.name != new_record.name;
            let became_exited = record.status != SessionStatus::Exited
                && new_record.status == SessionStatus::Exited;
            let exit_code = new_record.exit_code.unwrap_or(-1);
            entry.last_clear_offset.store(new_record.clear_offset(), Ordering::Release);
            *record = new_record;
            (name_changed, became_exited, exit_code)
        };

        if name_changed {
            let name = entry.record.read().await.name.clone();
            debug!("session renamed: {id} -> {name:?}");
            let _ = self.events_tx.send(SessionEvent::Renamed { id: id.to_owned(), name });
        }
        let _ = self.events_tx.send(SessionEvent::Updated { id: id.to_owned() });
        if became_exited {
            self.notify_exit(&entry, exit_code);
        }
    }

    /// Watcher: the session directory disappeared.
    pub async fn remove(&self, id: &str) {
        let Some(entry) = self.sessions.write().await.remove(id) else { return };
        entry.tail_cancel.cancel();
        info!("session removed: {id}");
        let _ = self.events_tx.send(SessionEvent::Removed { id: id.to_owned() });
    }

    /// Emit `session-exit` exactly once per session, whether the signal
    /// came from the recording's `"x"` line or from `session.json`.
    pub fn notify_exit(&self, entry: &SessionEntry, exit_code: i32) {
        if entry.exit_emitted.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("session exited: {} (code {exit_code})", entry.id);
        let _ = self
            .events_tx
            .send(SessionEvent::Exited { id: entry.id.clone(), exit_code });
    }
}

/// Sessions that were alive in `old` but are exited or gone in `new`.
/// Pure diff used to fire `session-exit` exactly once per transition.
pub fn detect_ended(
    old: &HashMap<String, SessionRecord>,
    new: &HashMap<String, SessionRecord>,
) -> Vec<String> {
    let mut ended: Vec<String> = old
        .iter()
        .filter(|(_, record)| record.status != SessionStatus::Exited)
        .filter(|(id, _)| {
            new.get(*id).map(|r| r.status == SessionStatus::Exited).unwrap_or(true)
        })
        .map(|(id, _)| id.clone())
        .collect();
    ended.sort();
    ended
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
