// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Launches `vibetunnel-fwd` for `POST /api/sessions`.

use std::process::Stdio;

use anyhow::Context;
use tracing::debug;

use vibetunnel_protocol::session::TitleMode;

use crate::config::Config;
use crate::transport::http::CreateSessionRequest;

fn title_mode_flag(mode: TitleMode) -> &'static str {
    match mode {
        TitleMode::None => "none",
        TitleMode::Filter => "filter",
        TitleMode::Static => "static",
        TitleMode::Dynamic => "dynamic",
    }
}

/// Spawn a detached forwarder for the request. The forwarder owns the
/// session directory from here on; we only keep a reaper task around so
/// the child never zombies.
pub async fn spawn_forwarder(
    config: &Config,
    id: &str,
    req: &CreateSessionRequest,
) -> anyhow::Result<()> {
    let mut cmd = tokio::process::Command::new(&config.fwd_path);
    cmd.arg("--session-id").arg(id);
    cmd.arg("--control-dir").arg(config.control_dir());
    if let Some(ref name) = req.name {
        cmd.arg("--session-name").arg(name);
    }
    if let Some(mode) = req.title_mode {
        cmd.arg("--title-mode").arg(title_mode_flag(mode));
    }
    if let Some(cols) = req.cols {
        cmd.arg("--cols").arg(cols.to_string());
    }
    if let Some(rows) = req.rows {
        cmd.arg("--rows").arg(rows.to_string());
    }
    cmd.arg("--");
    cmd.args(&req.command);

    cmd.current_dir(&req.working_dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    // The server itself may run under a wrapped shell; the forwarder must
    // not mistake that for nesting.
    cmd.env_remove("VIBETUNNEL_SESSION_ID");

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {} for session {id}", config.fwd_path))?;
    debug!("spawned forwarder for session {id} (pid {:?})", child.id());

    tokio::spawn(async move {
        let _ = child.wait().await;
    });
    Ok(())
}
