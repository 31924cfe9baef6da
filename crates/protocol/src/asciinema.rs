// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Asciinema v2 recording format.
//!
//! The stdout file starts with a JSON header line, followed by one JSON
//! array per event: `[seconds_since_start, kind, data]`. Kinds are `"o"`
//! (output), `"i"` (input), `"r"` (resize, data `"COLSxROWS"`), and `"x"`
//! (exit, data `"<code> <session_id>"`).

use serde::{Deserialize, Serialize};

/// Recording header, always the first line of the stdout file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Header {
    pub fn new(width: u16, height: u16) -> Self {
        Self { version: 2, width, height, timestamp: None, command: None, title: None }
    }

    pub fn to_line(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Output,
    Input,
    Resize,
    Exit,
}

impl EventKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Output => "o",
            Self::Input => "i",
            Self::Resize => "r",
            Self::Exit => "x",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "o" => Some(Self::Output),
            "i" => Some(Self::Input),
            "r" => Some(Self::Resize),
            "x" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// One event line of the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds since the header, monotonic non-decreasing.
    pub time: f64,
    pub kind: EventKind,
    pub data: String,
}

impl Event {
    pub fn output(time: f64, data: impl Into<String>) -> Self {
        Self { time, kind: EventKind::Output, data: data.into() }
    }

    pub fn input(time: f64, data: impl Into<String>) -> Self {
        Self { time, kind: EventKind::Input, data: data.into() }
    }

    pub fn resize(time: f64, cols: u16, rows: u16) -> Self {
        Self { time, kind: EventKind::Resize, data: format!("{cols}x{rows}") }
    }

    pub fn exit(time: f64, code: i32, session_id: &str) -> Self {
        Self { time, kind: EventKind::Exit, data: format!("{code} {session_id}") }
    }

    pub fn to_line(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&(self.time, self.kind.code(), &self.data))?)
    }

    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let (time, code, data): (f64, String, String) = serde_json::from_str(line)?;
        let kind = EventKind::from_code(&code)
            .ok_or_else(|| anyhow::anyhow!("unknown event kind {code:?}"))?;
        Ok(Self { time, kind, data })
    }

    /// Interpret a resize event's `"COLSxROWS"` payload.
    pub fn parse_resize(&self) -> anyhow::Result<(u16, u16)> {
        let (cols, rows) = self
            .data
            .split_once('x')
            .ok_or_else(|| anyhow::anyhow!("malformed resize data {:?}", self.data))?;
        Ok((cols.parse()?, rows.parse()?))
    }

    /// Interpret an exit event's `"<code> <session_id>"` payload.
    pub fn parse_exit(&self) -> anyhow::Result<(i32, String)> {
        let mut parts = self.data.splitn(2, ' ');
        let code = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty exit data"))?
            .parse()?;
        let session_id = parts.next().unwrap_or("").to_owned();
        Ok((code, session_id))
    }
}

#[cfg(test)]
#[path = "asciinema_tests.rs"]
mod tests;
