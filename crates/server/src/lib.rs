// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

pub mod config;
pub mod error;
pub mod ipc_client;
pub mod registry;
pub mod run;
pub mod spawn;
pub mod tailer;
pub mod term;
pub mod transport;
pub mod watcher;
