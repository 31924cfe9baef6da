// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use std::path::PathBuf;

use clap::Parser;
use vibetunnel_protocol::session;

/// Central server exposing forwarder sessions over HTTP and WebSocket.
#[derive(Debug, Clone, Parser)]
#[command(name = "vibetunnel-server", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "VIBETUNNEL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "VIBETUNNEL_PORT", default_value = "4020")]
    pub port: u16,

    /// Control directory holding per-session state.
    #[arg(long, env = "VIBETUNNEL_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    /// Path to the forwarder binary used for spawning sessions.
    #[arg(long, env = "VIBETUNNEL_FWD_PATH", default_value = "vibetunnel-fwd")]
    pub fwd_path: String,

    /// Scrollback rows kept per session.
    #[arg(long, default_value = "2000")]
    pub scrollback: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "VIBETUNNEL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, default_value = "text")]
    pub log_format: String,
}

impl Config {
    pub fn control_dir(&self) -> PathBuf {
        self.control_dir.clone().unwrap_or_else(session::default_control_dir)
    }
}
