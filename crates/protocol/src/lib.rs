// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Shared data model and wire formats for VibeTunnel.
//!
//! Everything the forwarder and the server must agree on lives here: the
//! per-session IPC framing, the `session.json` record, the asciinema v2
//! recording format, the terminal grid model, and the binary snapshot
//! encoding shipped to WebSocket clients.

pub mod asciinema;
pub mod frame;
pub mod grid;
pub mod ipc;
pub mod session;
pub mod snapshot;
