// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Length-prefixed framing for the per-session control socket.
//!
//! One unix-domain stream socket per session carries frames of the form
//! `[type: u8][len: u32 big-endian][payload: len bytes]`. Payloads above
//! [`MAX_PAYLOAD`] are a fatal protocol error and close the connection.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame payload.
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Frame type byte + 4-byte length prefix.
const HEADER_LEN: usize = 5;

/// Message types carried over the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Bytes to inject into the PTY master.
    StdinData,
    /// ASCII `"COLSxROWS"` resize request.
    Resize,
    /// Re-query the forwarder's local TTY and resize to match.
    ResetSize,
    /// Terminate the child: empty payload for SIGTERM, or a 4-byte
    /// big-endian signal number.
    Kill,
    /// UTF-8 bytes of the session's new name.
    UpdateTitle,
    /// Reserved JSON status reply.
    Status,
    /// UTF-8 error string sent back to the client.
    Error,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::StdinData => 0x01,
            Self::Resize => 0x02,
            Self::ResetSize => 0x03,
            Self::Kill => 0x04,
            Self::UpdateTitle => 0x05,
            Self::Status => 0x10,
            Self::Error => 0x7f,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::StdinData),
            0x02 => Some(Self::Resize),
            0x03 => Some(Self::ResetSize),
            0x04 => Some(Self::Kill),
            0x05 => Some(Self::UpdateTitle),
            0x10 => Some(Self::Status),
            0x7f => Some(Self::Error),
            _ => None,
        }
    }
}

/// A single decoded control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn stdin(data: impl Into<Bytes>) -> Self {
        Self { kind: MessageType::StdinData, payload: data.into() }
    }

    pub fn resize(cols: u16, rows: u16) -> Self {
        Self { kind: MessageType::Resize, payload: Bytes::from(format!("{cols}x{rows}")) }
    }

    pub fn reset_size() -> Self {
        Self { kind: MessageType::ResetSize, payload: Bytes::new() }
    }

    /// `signal == None` asks for the default (SIGTERM).
    pub fn kill(signal: Option<i32>) -> Self {
        let payload = match signal {
            Some(sig) => Bytes::copy_from_slice(&sig.to_be_bytes()),
            None => Bytes::new(),
        };
        Self { kind: MessageType::Kill, payload }
    }

    pub fn update_title(name: &str) -> Self {
        Self { kind: MessageType::UpdateTitle, payload: Bytes::copy_from_slice(name.as_bytes()) }
    }

    pub fn error(message: &str) -> Self {
        Self { kind: MessageType::Error, payload: Bytes::copy_from_slice(message.as_bytes()) }
    }

    /// Parse a `Resize` payload (`"COLSxROWS"`, both decimal).
    pub fn parse_resize(&self) -> anyhow::Result<(u16, u16)> {
        let text = std::str::from_utf8(&self.payload)?;
        let (cols, rows) =
            text.split_once('x').ok_or_else(|| anyhow::anyhow!("malformed resize: {text:?}"))?;
        Ok((cols.trim().parse()?, rows.trim().parse()?))
    }

    /// Parse a `Kill` payload into an optional signal number.
    pub fn parse_kill(&self) -> anyhow::Result<Option<i32>> {
        match self.payload.len() {
            0 => Ok(None),
            4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&self.payload);
                Ok(Some(i32::from_be_bytes(raw)))
            }
            n => anyhow::bail!("kill payload must be 0 or 4 bytes, got {n}"),
        }
    }
}

/// Tokio codec implementing the framing rules.
///
/// The decoder reassembles partial reads; an unknown type byte or an
/// oversize length is surfaced as `InvalidData`, which callers treat as
/// fatal for the connection.
#[derive(Debug, Default)]
pub struct IpcCodec;

impl Decoder for IpcCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = MessageType::from_u8(src[0]).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("unknown frame type {:#04x}", src[0]))
        })?;
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame payload {len} exceeds {MAX_PAYLOAD} bytes"),
            ));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { kind, payload }))
    }
}

impl Encoder<Frame> for IpcCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        if frame.payload.len() > MAX_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame payload {} exceeds {MAX_PAYLOAD} bytes", frame.payload.len()),
            ));
        }
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.kind.as_u8());
        dst.put_u32(frame.payload.len() as u32);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
