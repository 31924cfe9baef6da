// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Binary server→client frames for the multiplexed WebSocket.
//!
//! `[kind: u8][session_id_len: u32 LE][session_id][payload_len: u32 LE][payload]`

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Raw output bytes from the session.
    Output,
    /// A `SNAPSHOT_VT` payload.
    Snapshot,
    /// UTF-8 JSON lifecycle event.
    Event,
    /// UTF-8 error string.
    Error,
    /// Reply to a client ping; empty payload.
    Pong,
}

impl FrameKind {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Output => 1,
            Self::Snapshot => 2,
            Self::Event => 3,
            Self::Error => 4,
            Self::Pong => 5,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Output),
            2 => Some(Self::Snapshot),
            3 => Some(Self::Event),
            4 => Some(Self::Error),
            5 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// A decoded data frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub kind: FrameKind,
    /// Empty for frames that are not session-scoped (e.g. pong).
    pub session_id: String,
    pub payload: Bytes,
}

impl DataFrame {
    pub fn new(kind: FrameKind, session_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { kind, session_id: session_id.into(), payload: payload.into() }
    }

    pub fn pong() -> Self {
        Self::new(FrameKind::Pong, "", Bytes::new())
    }

    pub fn error(session_id: &str, message: &str) -> Self {
        Self::new(FrameKind::Error, session_id, Bytes::copy_from_slice(message.as_bytes()))
    }

    pub fn encode(&self) -> Bytes {
        let id = self.session_id.as_bytes();
        let mut buf = BytesMut::with_capacity(9 + id.len() + self.payload.len());
        buf.put_u8(self.kind.as_u8());
        buf.put_u32_le(id.len() as u32);
        buf.put_slice(id);
        buf.put_u32_le(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(data.len() >= 5, "frame shorter than its fixed header");
        let kind = FrameKind::from_u8(data[0])
            .ok_or_else(|| anyhow::anyhow!("unknown frame kind {}", data[0]))?;
        let id_len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
        let id_end = 5 + id_len;
        anyhow::ensure!(data.len() >= id_end + 4, "frame truncated in session id");
        let session_id = std::str::from_utf8(&data[5..id_end])?.to_owned();
        let payload_len =
            u32::from_le_bytes([data[id_end], data[id_end + 1], data[id_end + 2], data[id_end + 3]])
                as usize;
        let payload_start = id_end + 4;
        anyhow::ensure!(
            data.len() == payload_start + payload_len,
            "frame length mismatch: have {}, want {}",
            data.len(),
            payload_start + payload_len
        );
        Ok(Self {
            kind,
            session_id,
            payload: Bytes::copy_from_slice(&data[payload_start..]),
        })
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
