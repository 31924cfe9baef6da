// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use std::collections::HashMap;

use super::*;
use vibetunnel_protocol::session::{SessionRecord, SessionStatus};

fn record(id: &str, status: SessionStatus) -> SessionRecord {
    let mut record = SessionRecord::new(
        id.to_owned(),
        id.to_owned(),
        vec!["sh".to_owned()],
        "/".to_owned(),
    );
    record.status = status;
    record.started_at = format!("2026-01-01T00:00:0{}Z", id.len() % 10);
    record
}

fn registry() -> Arc<Registry> {
    Registry::new(std::env::temp_dir().join("vt-registry-tests"), 100)
}

#[tokio::test]
async fn insert_get_remove() -> anyhow::Result<()> {
    let registry = registry();
    let dir = registry.control_dir().join("a");
    registry.insert(record("a", SessionStatus::Running), dir).await;

    assert!(registry.contains("a").await);
    let entry = registry.get("a").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(entry.id, "a");

    registry.remove("a").await;
    assert!(!registry.contains("a").await);
    assert!(entry.tail_cancel.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn list_is_sorted_newest_first() {
    let registry = registry();
    let mut first = record("old", SessionStatus::Running);
    first.started_at = "2026-01-01T00:00:00Z".to_owned();
    let mut second = record("new", SessionStatus::Running);
    second.started_at = "2026-06-01T00:00:00Z".to_owned();

    registry.insert(first, registry.control_dir().join("old")).await;
    registry.insert(second, registry.control_dir().join("new")).await;

    let list = registry.list().await;
    assert_eq!(list[0].id, "new");
    assert_eq!(list[1].id, "old");
}

#[tokio::test]
async fn rename_emits_renamed_and_updated() -> anyhow::Result<()> {
    let registry = registry();
    let mut events = registry.subscribe_events();
    registry.insert(record("r", SessionStatus::Running), registry.control_dir().join("r")).await;
    assert!(matches!(events.recv().await?, SessionEvent::Appeared { .. }));

    let mut renamed = record("r", SessionStatus::Running);
    renamed.name = "fancy".to_owned();
    registry.apply_update("r", renamed).await;

    match events.recv().await? {
        SessionEvent::Renamed { id, name } => {
            assert_eq!(id, "r");
            assert_eq!(name, "fancy");
        }
        other => anyhow::bail!("unexpected event {other:?}"),
    }
    assert!(matches!(events.recv().await?, SessionEvent::Updated { .. }));
    Ok(())
}

#[tokio::test]
async fn exit_fires_exactly_once() -> anyhow::Result<()> {
    let registry = registry();
    let entry = registry
        .insert(record("x", SessionStatus::Running), registry.control_dir().join("x"))
        .await;
    let mut events = registry.subscribe_events();

    // Both the tailer path and the watcher path report the exit.
    registry.notify_exit(&entry, 143);
    let mut exited = record("x", SessionStatus::Exited);
    exited.exit_code = Some(143);
    registry.apply_update("x", exited).await;

    let mut exit_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Exited { .. }) {
            exit_events += 1;
        }
    }
    assert_eq!(exit_events, 1);
    Ok(())
}

#[tokio::test]
async fn already_exited_session_never_fires_exit() {
    let registry = registry();
    let mut events = registry.subscribe_events();
    let mut dead = record("d", SessionStatus::Exited);
    dead.exit_code = Some(0);
    let entry = registry.insert(dead, registry.control_dir().join("d")).await;

    registry.notify_exit(&entry, 0);

    let mut exit_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Exited { .. }) {
            exit_events += 1;
        }
    }
    assert_eq!(exit_events, 0);
}

#[test]
fn detect_ended_pure_diff() {
    let mut old = HashMap::new();
    old.insert("live".to_owned(), record("live", SessionStatus::Running));
    old.insert("gone".to_owned(), record("gone", SessionStatus::Running));
    old.insert("dead".to_owned(), record("dead", SessionStatus::Exited));
    old.insert("starting".to_owned(), record("starting", SessionStatus::Starting));

    let mut new = HashMap::new();
    new.insert("live".to_owned(), record("live", SessionStatus::Exited));
    new.insert("dead".to_owned(), record("dead", SessionStatus::Exited));
    new.insert("starting".to_owned(), record("starting", SessionStatus::Running));

    // "live" transitioned, "gone" vanished, "dead" was already over,
    // "starting" is still alive.
    assert_eq!(detect_ended(&old, &new), vec!["gone".to_owned(), "live".to_owned()]);
}

#[test]
fn detect_ended_empty_maps() {
    assert!(detect_ended(&HashMap::new(), &HashMap::new()).is_empty());
}
