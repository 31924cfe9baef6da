// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Polling watcher over the control directory.
//!
//! Every scan diffs the on-disk session directories against the registry:
//! new directories insert (and start a tailer), `session.json` mtime
//! changes reload, vanished directories evict. Polling is deliberate — it
//! behaves identically on every platform, unlike inotify/FSEvents.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use vibetunnel_protocol::session::{self, SESSION_FILE};

use crate::registry::Registry;
use crate::tailer;

pub const SCAN_INTERVAL: Duration = Duration::from_millis(500);

pub struct ControlDirWatcher {
    registry: Arc<Registry>,
    poll_interval: Duration,
    /// id → last seen `session.json` mtime.
    known: HashMap<String, SystemTime>,
}

impl ControlDirWatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, poll_interval: SCAN_INTERVAL, known: HashMap::new() }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Scan until shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.scan().await;
        }
    }

    /// One diffing pass over the control directory.
    pub async fn scan(&mut self) {
        let control_dir = self.registry.control_dir().clone();
        let mut seen: Vec<String> = Vec::new();

        let entries = match std::fs::read_dir(&control_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("control dir unreadable: {e}");
                return;
            }
        };

        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            if !session::is_valid_id(&id) {
                continue;
            }

            // The directory exists, so the session is not "vanished" even
            // when its record is momentarily unreadable.
            seen.push(id.clone());
            if let Err(e) = self.inspect(&id, &path).await {
                // Unparseable records stay invisible (or keep their last
                // good state) and are retried on the next scan.
                debug!("skipping session {id}: {e:#}");
            }
        }

        let vanished: Vec<String> =
            self.known.keys().filter(|id| !seen.contains(id)).cloned().collect();
        for id in vanished {
            self.known.remove(&id);
            self.registry.remove(&id).await;
        }
    }

    async fn inspect(&mut self, id: &str, dir: &Path) -> anyhow::Result<()> {
        let session_path = dir.join(SESSION_FILE);
        let mtime = std::fs::metadata(&session_path)?.modified()?;

        match self.known.get(id) {
            None => {
                let record = session::load(&session_path)?;
                anyhow::ensure!(record.id == id, "record id {:?} does not match directory", record.id);
                let entry = self.registry.insert(record, dir.to_path_buf()).await;
                tailer::spawn(entry, Arc::clone(&self.registry));
                self.known.insert(id.to_owned(), mtime);
            }
            Some(last) if *last != mtime => {
                let record = session::load(&session_path)?;
                self.registry.apply_update(id, record).await;
                self.known.insert(id.to_owned(), mtime);
            }
            Some(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
