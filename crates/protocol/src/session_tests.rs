// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use super::*;

fn sample() -> SessionRecord {
    SessionRecord::new(
        "abc-123".to_owned(),
        "demo".to_owned(),
        vec!["/bin/sh".to_owned(), "-c".to_owned(), "true".to_owned()],
        "/tmp".to_owned(),
    )
}

#[test]
fn id_charset() {
    assert!(is_valid_id("abc-123_DEF"));
    assert!(is_valid_id("x"));
    assert!(!is_valid_id(""));
    assert!(!is_valid_id("has space"));
    assert!(!is_valid_id("dot.dot"));
    assert!(!is_valid_id("../escape"));
}

#[test]
fn generated_ids_are_valid() {
    for _ in 0..16 {
        assert!(is_valid_id(&generate_id()));
    }
}

#[test]
fn status_serializes_lowercase() -> anyhow::Result<()> {
    let json = serde_json::to_string(&SessionStatus::Running)?;
    assert_eq!(json, "\"running\"");
    let parsed: SessionStatus = serde_json::from_str("\"exited\"")?;
    assert_eq!(parsed, SessionStatus::Exited);
    Ok(())
}

#[test]
fn title_mode_dynamic_normalizes_to_static() {
    assert_eq!(TitleMode::Dynamic.normalized(), TitleMode::Static);
    assert_eq!(TitleMode::Filter.normalized(), TitleMode::Filter);
}

#[test]
fn record_roundtrips_through_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(SESSION_FILE);

    let mut record = sample();
    record.status = SessionStatus::Running;
    record.pid = Some(4242);
    record.initial_cols = Some(80);
    record.initial_rows = Some(24);
    store(&path, &record)?;

    let loaded = load(&path)?;
    assert_eq!(loaded.id, "abc-123");
    assert_eq!(loaded.status, SessionStatus::Running);
    assert_eq!(loaded.pid, Some(4242));
    assert_eq!(loaded.initial_cols, Some(80));
    Ok(())
}

#[test]
fn camel_case_field_names_on_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(SESSION_FILE);
    store(&path, &sample())?;

    let raw = std::fs::read_to_string(&path)?;
    assert!(raw.contains("\"workingDir\""));
    assert!(raw.contains("\"startedAt\""));
    assert!(!raw.contains("\"working_dir\""));
    Ok(())
}

#[test]
fn unknown_keys_survive_rewrite() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(SESSION_FILE);
    std::fs::write(
        &path,
        r#"{"id":"x","name":"old","command":["sh"],"workingDir":"/","status":"running","startedAt":"2026-01-01T00:00:00Z","customKey":42,"gitBranch":"main"}"#,
    )?;

    let mut record = load(&path)?;
    assert_eq!(record.extra.get("customKey"), Some(&serde_json::json!(42)));
    record.status = SessionStatus::Exited;
    record.exit_code = Some(0);
    store(&path, &record)?;

    let reloaded = load(&path)?;
    assert_eq!(reloaded.extra.get("customKey"), Some(&serde_json::json!(42)));
    assert_eq!(reloaded.extra.get("gitBranch"), Some(&serde_json::json!("main")));
    assert_eq!(reloaded.exit_code, Some(0));
    Ok(())
}

#[test]
fn patch_name_touches_only_name() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(SESSION_FILE);
    std::fs::write(
        &path,
        r#"{"id":"x","name":"old","command":["sh"],"workingDir":"/","status":"running","startedAt":"2026-01-01T00:00:00Z","customKey":42}"#,
    )?;

    patch_name(&path, "new")?;

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(value["name"], "new");
    assert_eq!(value["customKey"], 42);
    assert_eq!(value["status"], "running");
    assert_eq!(value["command"], serde_json::json!(["sh"]));
    Ok(())
}

#[test]
fn patch_name_on_missing_file_errors() {
    let result = patch_name(Path::new("/nonexistent/session.json"), "x");
    assert!(result.is_err());
}

#[test]
fn exit_code_absent_until_exited() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(SESSION_FILE);
    store(&path, &sample())?;
    let raw = std::fs::read_to_string(&path)?;
    assert!(!raw.contains("exitCode"));
    Ok(())
}
