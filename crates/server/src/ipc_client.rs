// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Client side of the per-session control socket.
//!
//! The server keeps one connection per session, shared by every WebSocket
//! client and REST handler. The connection is opened lazily on the first
//! send and re-opened on the next send after a failure; the internal lock
//! serializes writes so input frames never interleave.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use futures_util::SinkExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use vibetunnel_protocol::ipc::{Frame, IpcCodec};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

pub struct IpcClient {
    path: PathBuf,
    conn: Mutex<Option<Framed<UnixStream, IpcCodec>>>,
}

impl IpcClient {
    pub fn new(path: PathBuf) -> Self {
        Self { path, conn: Mutex::new(None) }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Send one frame, connecting lazily. A send on a stale connection is
    /// retried once on a fresh one.
    pub async fn send(&self, frame: Frame) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().await;

        if let Some(framed) = conn.as_mut() {
            match tokio::time::timeout(WRITE_DEADLINE, framed.send(frame.clone())).await {
                Ok(Ok(())) => return Ok(()),
                _ => *conn = None,
            }
        }

        let mut framed = self.connect().await?;
        tokio::time::timeout(WRITE_DEADLINE, framed.send(frame))
            .await
            .context("ipc write deadline exceeded")?
            .context("ipc write failed")?;
        *conn = Some(framed);
        Ok(())
    }

    async fn connect(&self) -> anyhow::Result<Framed<UnixStream, IpcCodec>> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.path))
            .await
            .with_context(|| format!("timed out connecting to {}", self.path.display()))?
            .with_context(|| format!("connecting to {}", self.path.display()))?;
        Ok(Framed::new(stream, IpcCodec))
    }
}
