// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use std::path::PathBuf;

use clap::Parser;
use vibetunnel_protocol::session::{self, TitleMode};

/// Wrap a command in a recorded, remotely controllable PTY session.
#[derive(Debug, Parser)]
#[command(name = "vibetunnel-fwd", version, about)]
pub struct Config {
    /// Session id to use; generated when omitted.
    #[arg(long)]
    pub session_id: Option<String>,

    /// Human-readable session name; defaults to the command's basename.
    #[arg(long)]
    pub session_name: Option<String>,

    /// How child-emitted OSC title sequences are handled.
    #[arg(long, env = "VIBETUNNEL_TITLE_MODE", value_enum, default_value = "none")]
    pub title_mode: TitleMode,

    /// Rename an existing session and exit (requires --session-id).
    #[arg(long)]
    pub update_title: Option<String>,

    /// Control directory holding per-session state.
    #[arg(long, env = "VIBETUNNEL_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    /// Initial terminal columns (defaults to the local TTY, then 80).
    #[arg(long)]
    pub cols: Option<u16>,

    /// Initial terminal rows (defaults to the local TTY, then 24).
    #[arg(long)]
    pub rows: Option<u16>,

    /// Log level (silent, error, warn, info, verbose, debug).
    #[arg(long, env = "VIBETUNNEL_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Log file path; the interactive terminal is never used for logs.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Raise verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Command to run (after --).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ref id) = self.session_id {
            if !session::is_valid_id(id) {
                anyhow::bail!("invalid session id {id:?} (allowed: A-Z a-z 0-9 _ -)");
            }
        }

        if self.update_title.is_some() {
            if self.session_id.is_none() {
                anyhow::bail!("--update-title requires --session-id");
            }
            return Ok(());
        }

        if self.command.is_empty() {
            anyhow::bail!("no command specified (pass it after --)");
        }
        Ok(())
    }

    /// Resolve the control directory (flag > env > `~/.vibetunnel/control`).
    pub fn control_dir(&self) -> PathBuf {
        self.control_dir.clone().unwrap_or_else(session::default_control_dir)
    }

    /// Resolve the log file (`~/.vibetunnel/log.txt` by default).
    pub fn log_file(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
            PathBuf::from(home).join(".vibetunnel").join("log.txt")
        })
    }

    /// Effective tracing filter from --log-level, -q, and -v flags.
    pub fn effective_log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => match self.log_level.as_str() {
                "silent" => "off",
                "error" => "error",
                "warn" => "warn",
                "info" => "info",
                "verbose" | "debug" => "debug",
                "trace" => "trace",
                _ => "warn",
            },
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
