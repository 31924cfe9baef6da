// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use clap::Parser;

use super::Config;
use vibetunnel_protocol::session::TitleMode;

fn parse(args: &[&str]) -> anyhow::Result<Config> {
    let mut full = vec!["vibetunnel-fwd"];
    full.extend_from_slice(args);
    Ok(Config::try_parse_from(full)?)
}

#[test]
fn command_after_double_dash() -> anyhow::Result<()> {
    let config = parse(&["--", "/bin/sh", "-c", "true"])?;
    config.validate()?;
    assert_eq!(config.command, vec!["/bin/sh", "-c", "true"]);
    Ok(())
}

#[test]
fn missing_command_rejected() -> anyhow::Result<()> {
    let config = parse(&[])?;
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn update_title_requires_session_id() -> anyhow::Result<()> {
    let config = parse(&["--update-title", "new name"])?;
    assert!(config.validate().is_err());

    let config = parse(&["--session-id", "abc", "--update-title", "new name"])?;
    config.validate()?;
    Ok(())
}

#[test]
fn update_title_needs_no_command() -> anyhow::Result<()> {
    let config = parse(&["--session-id", "abc", "--update-title", "x"])?;
    config.validate()?;
    assert!(config.command.is_empty());
    Ok(())
}

#[test]
fn bad_session_id_rejected() -> anyhow::Result<()> {
    let config = parse(&["--session-id", "../etc", "--", "sh"])?;
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn title_mode_parses() -> anyhow::Result<()> {
    let config = parse(&["--title-mode", "filter", "--", "sh"])?;
    assert_eq!(config.title_mode, TitleMode::Filter);

    let config = parse(&["--title-mode", "dynamic", "--", "sh"])?;
    assert_eq!(config.title_mode.normalized(), TitleMode::Static);
    Ok(())
}

#[test]
fn verbosity_flags() -> anyhow::Result<()> {
    assert_eq!(parse(&["--", "sh"])?.effective_log_level(), "warn");
    assert_eq!(parse(&["-q", "--", "sh"])?.effective_log_level(), "error");
    assert_eq!(parse(&["-v", "--", "sh"])?.effective_log_level(), "info");
    assert_eq!(parse(&["-vv", "--", "sh"])?.effective_log_level(), "debug");
    assert_eq!(parse(&["-vvv", "--", "sh"])?.effective_log_level(), "trace");
    assert_eq!(parse(&["--log-level", "silent", "--", "sh"])?.effective_log_level(), "off");
    Ok(())
}

#[test]
fn hyphen_values_pass_through_to_command() -> anyhow::Result<()> {
    let config = parse(&["--", "ls", "-la", "--color=auto"])?;
    assert_eq!(config.command, vec!["ls", "-la", "--color=auto"]);
    Ok(())
}
