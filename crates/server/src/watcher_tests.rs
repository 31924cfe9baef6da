// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use std::path::Path;

use super::*;
use crate::registry::SessionEvent;
use vibetunnel_protocol::session::SessionStatus;

fn seed_session(control: &Path, id: &str, status: &str) -> anyhow::Result<()> {
    let dir = control.join(id);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(
        dir.join(SESSION_FILE),
        format!(
            r#"{{"id":"{id}","name":"{id}","command":["sh"],"workingDir":"/","status":"{status}","startedAt":"2026-01-01T00:00:00Z"}}"#
        ),
    )?;
    Ok(())
}

#[tokio::test]
async fn new_directory_appears_in_registry() -> anyhow::Result<()> {
    let control = tempfile::tempdir()?;
    seed_session(control.path(), "fresh", "running")?;

    let registry = Registry::new(control.path().to_path_buf(), 100);
    let mut watcher = ControlDirWatcher::new(Arc::clone(&registry));
    watcher.scan().await;

    assert!(registry.contains("fresh").await);
    let list = registry.list().await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].status, SessionStatus::Running);
    Ok(())
}

#[tokio::test]
async fn mtime_change_reloads_record() -> anyhow::Result<()> {
    let control = tempfile::tempdir()?;
    seed_session(control.path(), "s", "running")?;

    let registry = Registry::new(control.path().to_path_buf(), 100);
    let mut watcher = ControlDirWatcher::new(Arc::clone(&registry));
    watcher.scan().await;

    // Rewrite with a new name and a bumped mtime.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let path = control.path().join("s").join(SESSION_FILE);
    std::fs::write(
        &path,
        r#"{"id":"s","name":"renamed","command":["sh"],"workingDir":"/","status":"running","startedAt":"2026-01-01T00:00:00Z"}"#,
    )?;
    filetime_bump(&path)?;

    let mut events = registry.subscribe_events();
    watcher.scan().await;

    let entry = registry.get("s").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(entry.record.read().await.name, "renamed");

    let mut saw_rename = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Renamed { .. }) {
            saw_rename = true;
        }
    }
    assert!(saw_rename);
    Ok(())
}

#[tokio::test]
async fn removed_directory_evicts_session() -> anyhow::Result<()> {
    let control = tempfile::tempdir()?;
    seed_session(control.path(), "doomed", "running")?;

    let registry = Registry::new(control.path().to_path_buf(), 100);
    let mut watcher = ControlDirWatcher::new(Arc::clone(&registry));
    watcher.scan().await;
    assert!(registry.contains("doomed").await);

    std::fs::remove_dir_all(control.path().join("doomed"))?;
    watcher.scan().await;
    assert!(!registry.contains("doomed").await);
    Ok(())
}

#[tokio::test]
async fn unparseable_record_stays_invisible_then_recovers() -> anyhow::Result<()> {
    let control = tempfile::tempdir()?;
    let dir = control.path().join("broken");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(SESSION_FILE), "{not json")?;

    let registry = Registry::new(control.path().to_path_buf(), 100);
    let mut watcher = ControlDirWatcher::new(Arc::clone(&registry));
    watcher.scan().await;
    assert!(!registry.contains("broken").await);

    // Fixing the file gets it picked up on a later scan.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    seed_session(control.path(), "broken", "running")?;
    filetime_bump(&dir.join(SESSION_FILE))?;
    watcher.scan().await;
    assert!(registry.contains("broken").await);
    Ok(())
}

#[tokio::test]
async fn corrupt_update_keeps_previous_record() -> anyhow::Result<()> {
    let control = tempfile::tempdir()?;
    seed_session(control.path(), "keep", "running")?;

    let registry = Registry::new(control.path().to_path_buf(), 100);
    let mut watcher = ControlDirWatcher::new(Arc::clone(&registry));
    watcher.scan().await;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let path = control.path().join("keep").join(SESSION_FILE);
    std::fs::write(&path, "garbage")?;
    filetime_bump(&path)?;
    watcher.scan().await;

    // Still present, still the last good record.
    let entry = registry.get("keep").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(entry.record.read().await.name, "keep");
    Ok(())
}

#[tokio::test]
async fn non_session_entries_ignored() -> anyhow::Result<()> {
    let control = tempfile::tempdir()?;
    std::fs::write(control.path().join("stray-file"), "x")?;
    std::fs::create_dir_all(control.path().join("no-record-here"))?;
    std::fs::create_dir_all(control.path().join("bad id!"))?;

    let registry = Registry::new(control.path().to_path_buf(), 100);
    let mut watcher = ControlDirWatcher::new(Arc::clone(&registry));
    watcher.scan().await;
    assert!(registry.list().await.is_empty());
    Ok(())
}

/// Ensure a follow-up write is observable even on coarse-mtime filesystems.
fn filetime_bump(path: &Path) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new().append(true).open(path)?;
    file.set_modified(std::time::SystemTime::now())?;
    Ok(())
}
