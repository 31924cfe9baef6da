// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! The `session.json` record and its on-disk handling.
//!
//! Every session lives in `<control_dir>/<id>/` with a metadata file that is
//! rewritten atomically (temp file + rename) on each change. Keys this crate
//! does not recognize — git metadata and anything newer clients add — ride
//! in [`SessionRecord::extra`] and survive every rewrite.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Metadata file name inside a session directory.
pub const SESSION_FILE: &str = "session.json";
/// Asciinema v2 recording of the session's output.
pub const STDOUT_FILE: &str = "stdout";
/// FIFO for external input injection.
pub const STDIN_FILE: &str = "stdin";
/// Control socket owned by the forwarder.
pub const IPC_SOCKET: &str = "ipc.sock";

/// Directory holding one subdirectory per session.
///
/// Resolution order: explicit override, `VIBETUNNEL_CONTROL_DIR`, then
/// `~/.vibetunnel/control`.
pub fn default_control_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VIBETUNNEL_CONTROL_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    Path::new(&home).join(".vibetunnel").join("control")
}

pub fn session_dir(control_dir: &Path, id: &str) -> PathBuf {
    control_dir.join(id)
}

/// Session ids are opaque short tokens over `[A-Za-z0-9_-]`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Generate a fresh session id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// ISO-8601 UTC timestamp for `startedAt`.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Exited,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
        }
    }

    /// Whether the session still has (or may soon have) a live child.
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Exited)
    }
}

/// How the forwarder treats OSC title sequences from the child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TitleMode {
    /// Pass all bytes through unchanged.
    #[default]
    None,
    /// Strip recognized OSC 0/1/2 sequences end-to-end.
    Filter,
    /// Strip child titles; the forwarder owns the title from the session name.
    Static,
    /// Legacy alias of `static`.
    Dynamic,
}

impl TitleMode {
    /// Collapse the legacy alias.
    pub fn normalized(self) -> Self {
        match self {
            Self::Dynamic => Self::Static,
            other => other,
        }
    }
}

/// The persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_cols: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_rows: Option<u16>,
    /// Bytes of the stdout file before this offset are considered cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_clear_offset: Option<u64>,
    /// True when started from a shell that is itself wrapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_via_vt: Option<bool>,
    /// Unrecognized keys (git snapshot fields and friends), preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionRecord {
    pub fn new(id: String, name: String, command: Vec<String>, working_dir: String) -> Self {
        Self {
            id,
            name,
            command,
            working_dir,
            status: SessionStatus::Starting,
            exit_code: None,
            started_at: now_timestamp(),
            pid: None,
            initial_cols: None,
            initial_rows: None,
            last_clear_offset: None,
            attached_via_vt: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn clear_offset(&self) -> u64 {
        self.last_clear_offset.unwrap_or(0)
    }
}

/// Read and parse a session record.
pub fn load(path: &Path) -> anyhow::Result<SessionRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Atomically rewrite a session record (temp file in the same directory,
/// then rename).
pub fn store(path: &Path, record: &SessionRecord) -> anyhow::Result<()> {
    let body = serde_json::to_string(record)?;
    write_atomic(path, body.as_bytes())
}

/// Patch only the `name` field of an existing record, leaving every other
/// key — recognized or not — byte-for-byte intact.
pub fn patch_name(path: &Path, name: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut value: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    value.insert("name".to_owned(), serde_json::Value::String(name.to_owned()));
    write_atomic(path, serde_json::to_string(&value)?.as_bytes())
}

fn write_atomic(path: &Path, body: &[u8]) -> anyhow::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temp file in {}", parent.display()))?;
    std::fs::write(tmp.path(), body)?;
    tmp.persist(path).with_context(|| format!("renaming over {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
