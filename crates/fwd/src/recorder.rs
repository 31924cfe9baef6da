// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Append-only asciinema v2 writer for the session's stdout file.
//!
//! Safe to call from any task: a single lock serializes writers, the event
//! clock is read under that lock so timestamps are monotonic and ties keep
//! FIFO order. Every event is flushed before the call returns so tailing
//! readers never observe a partial line.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use parking_lot::Mutex;
use vibetunnel_protocol::asciinema::{Event, EventKind, Header};

pub struct Recorder {
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    start: Instant,
    last_time: f64,
}

impl Recorder {
    /// Create the recording file and write its header line.
    pub fn create(path: &Path, header: &Header) -> anyhow::Result<Self> {
        let mut file = File::create(path)
            .with_context(|| format!("creating recording {}", path.display()))?;
        let mut line = header.to_line()?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(Self { inner: Mutex::new(Inner { file, start: Instant::now(), last_time: 0.0 }) })
    }

    pub fn write_output(&self, data: &[u8]) -> anyhow::Result<()> {
        self.append(EventKind::Output, String::from_utf8_lossy(data).into_owned())
    }

    pub fn write_input(&self, data: &[u8]) -> anyhow::Result<()> {
        self.append(EventKind::Input, String::from_utf8_lossy(data).into_owned())
    }

    pub fn write_resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.append(EventKind::Resize, format!("{cols}x{rows}"))
    }

    /// The exit record; by convention the last line of the file.
    pub fn write_exit(&self, code: i32, session_id: &str) -> anyhow::Result<()> {
        self.append(EventKind::Exit, format!("{code} {session_id}"))
    }

    /// Seconds since the recording started.
    pub fn elapsed(&self) -> f64 {
        self.inner.lock().start.elapsed().as_secs_f64()
    }

    fn append(&self, kind: EventKind, data: String) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let mut time = inner.start.elapsed().as_secs_f64();
        if time < inner.last_time {
            time = inner.last_time;
        }
        inner.last_time = time;

        let mut line = Event { time, kind, data }.to_line()?;
        line.push('\n');
        inner.file.write_all(line.as_bytes())?;
        inner.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
