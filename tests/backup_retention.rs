// tests/backup_retention.rs
//
// Snapshot + count-based retention against a real directory.

use std::fs::File;
use std::time::{Duration, SystemTime};

use tremor_watch::backup::BackupManager;

fn seed_backups(dir: &std::path::Path, n: usize) -> Vec<String> {
    std::fs::create_dir_all(dir).unwrap();
    let base = SystemTime::now() - Duration::from_secs(3600);
    let mut names = Vec::new();
    for i in 0..n {
        let name = format!("db_backup_auto_2026-10-18T00-{i:02}-00-000Z.json");
        let path = dir.join(&name);
        std::fs::write(&path, format!("{{\"n\":{i}}}")).unwrap();
        // Older index, older mtime.
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(base + Duration::from_secs(i as u64 * 60))
            .unwrap();
        names.push(name);
    }
    names
}

#[test]
fn prune_keeps_the_newest_ten_of_fifteen() {
    let tmp = tempfile::tempdir().unwrap();
    let bdir = tmp.path().join("backups");
    let names = seed_backups(&bdir, 15);
    let mgr = BackupManager::new(tmp.path().join("db.json"), &bdir);

    let deleted = mgr.prune(10).unwrap();
    assert_eq!(deleted, 5);

    let left: Vec<String> = mgr.list().unwrap().into_iter().map(|b| b.filename).collect();
    let mut expected: Vec<String> = names[5..].to_vec();
    expected.reverse();
    assert_eq!(left, expected);
}

#[test]
fn prune_below_threshold_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let bdir = tmp.path().join("backups");
    seed_backups(&bdir, 4);
    let mgr = BackupManager::new(tmp.path().join("db.json"), &bdir);

    assert_eq!(mgr.prune(10).unwrap(), 0);
    assert_eq!(mgr.list().unwrap().len(), 4);
}

#[test]
fn snapshot_then_list_reports_size_and_newest_first() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tmp.path().join("db.json");
    std::fs::write(&db, r#"{"guildConfigs":{},"trackedQuakes":[]}"#).unwrap();
    let bdir = tmp.path().join("backups");
    seed_backups(&bdir, 2);
    let mgr = BackupManager::new(&db, &bdir);

    let made = mgr.snapshot(Some("manual")).unwrap();
    let list = mgr.list().unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(list[0].path, made);
    assert_eq!(list[0].size, std::fs::metadata(&db).unwrap().len());
}

#[test]
fn run_once_swallows_missing_store() {
    let tmp = tempfile::tempdir().unwrap();
    let mgr = BackupManager::new(tmp.path().join("missing.json"), tmp.path().join("b"));
    // Logged, never panics or errors.
    mgr.run_once("auto", 10);
    assert!(mgr.list().unwrap().is_empty());
}

#[tokio::test]
async fn retention_task_takes_startup_snapshot_and_stops_on_shutdown() {
    let tmp = tempfile::tempdir().unwrap();
    let db = tmp.path().join("db.json");
    std::fs::write(&db, "{}").unwrap();
    let mgr = BackupManager::new(&db, tmp.path().join("b"));

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tremor_watch::backup::spawn_retention_task(
        mgr.clone(),
        10,
        Duration::from_secs(3600),
        rx,
    );

    // Startup snapshot happens before the first await on the ticker.
    for _ in 0..50 {
        if !mgr.list().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let list = mgr.list().unwrap();
    assert_eq!(list.len(), 1);
    assert!(list[0].filename.starts_with("db_backup_startup_"));

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("task stops after shutdown")
        .unwrap();
}
