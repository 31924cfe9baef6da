// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Tails a session's asciinema stdout file into the snapshot engine and
//! the output fan-out.
//!
//! One tailer per session. It seeks to `lastClearOffset`, consumes whole
//! lines only (the recorder writes and flushes line-atomically), and keeps
//! polling past EOF until the session has exited and the file is drained.
//! When the clear offset jumps forward, the tailer reseeks and resets the
//! emulator.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use vibetunnel_protocol::asciinema::{Event, EventKind, Header};
use vibetunnel_protocol::session::{SessionStatus, STDOUT_FILE};

use crate::registry::{Registry, SessionEntry};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Start the tail task for a session entry. Cancelled via
/// `entry.tail_cancel` when the session is evicted.
pub fn spawn(entry: Arc<SessionEntry>, registry: Arc<Registry>) {
    tokio::spawn(async move {
        run_tail(entry, registry).await;
    });
}

async fn run_tail(entry: Arc<SessionEntry>, registry: Arc<Registry>) {
    let path = entry.dir.join(STDOUT_FILE);
    let cancel = entry.tail_cancel.clone();
    let mut offset = entry.last_clear_offset.load(Ordering::Acquire);
    let mut header_parsed = offset > 0;
    let mut tick = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        // `lastClearOffset` advanced: everything before it is cleared.
        let clear = entry.last_clear_offset.load(Ordering::Acquire);
        if clear > offset {
            offset = clear;
            header_parsed = true;
            entry.terminal.write().await.reset();
            bump(&entry).await;
        }

        let lines = match read_lines(&path, &mut offset) {
            Ok(lines) => lines,
            Err(e) => {
                debug!("tail read failed for {}: {e}", entry.id);
                continue;
            }
        };

        let drained = lines.is_empty();
        for line in lines {
            if !header_parsed {
                header_parsed = true;
                if let Ok(header) = Header::parse(&line) {
                    apply_header(&entry, &header).await;
                    continue;
                }
            }
            match Event::parse(&line) {
                Ok(event) => handle_event(&entry, &registry, event).await,
                Err(e) => warn!("bad recording line in {}: {e:#}", entry.id),
            }
        }

        if drained && entry.record.read().await.status == SessionStatus::Exited {
            break;
        }
    }
}

async fn apply_header(entry: &SessionEntry, header: &Header) {
    let mut terminal = entry.terminal.write().await;
    if (terminal.grid().cols(), terminal.grid().rows()) != (header.width, header.height) {
        terminal.resize(header.width, header.height);
    }
}

async fn handle_event(entry: &SessionEntry, registry: &Registry, event: Event) {
    match event.kind {
        EventKind::Output => {
            let bytes = Bytes::from(event.data.into_bytes());
            entry.terminal.write().await.feed(&bytes);
            bump(entry).await;
            // Fan out the raw chunk; lagging subscribers resync via snapshot.
            let _ = entry.output_tx.send(bytes);
        }
        EventKind::Resize => match event.parse_resize() {
            Ok((cols, rows)) => {
                entry.terminal.write().await.resize(cols, rows);
                bump(entry).await;
            }
            Err(e) => warn!("bad resize event in {}: {e:#}", entry.id),
        },
        EventKind::Exit => match event.parse_exit() {
            Ok((code, _)) => registry.notify_exit(entry, code),
            Err(e) => warn!("bad exit event in {}: {e:#}", entry.id),
        },
        // Input lines are an audit trail; they do not affect the grid.
        EventKind::Input => {}
    }
}

/// Publish the emulator's change counter to snapshot subscribers.
async fn bump(entry: &SessionEntry) {
    let seq = entry.terminal.read().await.seq();
    entry.update_tx.send_replace(seq);
}

/// Read complete lines appended since `offset`, advancing it only past
/// newline-terminated data so a mid-write flush is never half-consumed.
fn read_lines(path: &Path, offset: &mut u64) -> std::io::Result<Vec<String>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(*offset))?;

    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        if !line.ends_with('\n') {
            break;
        }
        *offset += n as u64;
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_owned());
        }
    }
    Ok(lines)
}

#[cfg(test)]
#[path = "tailer_tests.rs"]
mod tests;
