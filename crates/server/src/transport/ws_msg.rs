// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Client control messages for the multiplexed WebSocket (JSON text
//! frames), and the lifecycle-event payloads sent back on the `events`
//! stream.

use serde::{Deserialize, Serialize};

use crate::registry::SessionEvent;

/// Streams a client can subscribe to per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Output,
    Snapshot,
    Events,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Subscribe {
        session_id: String,
        streams: Vec<StreamKind>,
    },
    Unsubscribe {
        session_id: String,
        streams: Vec<StreamKind>,
    },
    /// Keystrokes, base64-encoded.
    Input {
        session_id: String,
        data: String,
    },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    ResetSize {
        session_id: String,
    },
    Kill {
        session_id: String,
        #[serde(default)]
        signal: Option<i32>,
    },
    Rename {
        session_id: String,
        name: String,
    },
    Ping,
}

/// JSON payload for an `EVENT` data frame, or `None` for registry events
/// that have no client-facing representation.
pub fn event_json(event: &SessionEvent) -> Option<serde_json::Value> {
    match event {
        SessionEvent::Exited { id, exit_code } => Some(serde_json::json!({
            "kind": "session-exit",
            "sessionId": id,
            "exitCode": exit_code,
        })),
        SessionEvent::Renamed { id, name } => Some(serde_json::json!({
            "kind": "session-rename",
            "sessionId": id,
            "name": name,
        })),
        SessionEvent::Appeared { id } | SessionEvent::Updated { id } => {
            Some(serde_json::json!({
                "kind": "session-update",
                "sessionId": id,
            }))
        }
        SessionEvent::Removed { .. } => None,
    }
}

#[cfg(test)]
#[path = "ws_msg_tests.rs"]
mod tests;
