// src/backup.rs
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const PREFIX: &str = "db_backup_";
const SUFFIX: &str = ".json";
pub const DEFAULT_KEEP: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub created: DateTime<Utc>,
}

/// Timestamped copies of the store file, with count-based retention.
#[derive(Debug, Clone)]
pub struct BackupManager {
    store_path: PathBuf,
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(store_path: P, backup_dir: Q) -> Self {
        Self {
            store_path: store_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Copy the store file to `db_backup_[label_]<timestamp>.json`.
    /// A missing store file is an error.
    pub fn snapshot(&self, label: Option<&str>) -> Result<PathBuf> {
        if !self.backup_dir.exists() {
            std::fs::create_dir_all(&self.backup_dir).with_context(|| {
                format!("creating backup dir {}", self.backup_dir.display())
            })?;
            tracing::info!(dir = %self.backup_dir.display(), "created backup directory");
        }
        if !self.store_path.exists() {
            bail!("Database not found at {}", self.store_path.display());
        }

        let ts = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let name = match label.map(str::trim).filter(|l| !l.is_empty()) {
            Some(l) => format!("{PREFIX}{l}_{ts}{SUFFIX}"),
            None => format!("{PREFIX}{ts}{SUFFIX}"),
        };
        let dest = self.backup_dir.join(name);

        let size = std::fs::copy(&self.store_path, &dest).with_context(|| {
            format!(
                "copying {} to {}",
                self.store_path.display(),
                dest.display()
            )
        })?;
        counter!("backup_snapshots_total").increment(1);
        tracing::info!(path = %dest.display(), kb = size as f64 / 1024.0, "backup created");
        Ok(dest)
    }

    /// Backups newest first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        let rd = match std::fs::read_dir(&self.backup_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading {}", self.backup_dir.display()))
            }
        };

        let mut out = Vec::new();
        for entry in rd.flatten() {
            let filename = entry.file_name().to_string_lossy().to_string();
            if !(filename.starts_with(PREFIX) && filename.ends_with(SUFFIX)) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let created = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push(BackupEntry {
                filename,
                path: entry.path(),
                size: meta.len(),
                created: DateTime::<Utc>::from(created),
            });
        }
        // Names embed the timestamp, so they break mtime ties.
        out.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(out)
    }

    /// Delete all but the newest `keep` backups. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let backups = self.list()?;
        if backups.len() <= keep {
            tracing::debug!(found = backups.len(), keep, "no backup cleanup needed");
            return Ok(0);
        }

        let mut deleted = 0usize;
        for b in &backups[keep..] {
            match std::fs::remove_file(&b.path) {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!(file = %b.filename, "deleted old backup");
                }
                Err(e) => tracing::warn!(file = %b.filename, error = %e, "failed to delete backup"),
            }
        }
        tracing::info!(deleted, keep, "backup cleanup finished");
        Ok(deleted)
    }

    /// Snapshot then prune; failures are logged, never returned.
    pub fn run_once(&self, label: &str, keep: usize) {
        if let Err(e) = self.snapshot(Some(label)).and_then(|_| self.prune(keep)) {
            counter!("backup_failures_total").increment(1);
            tracing::warn!(label, error = ?e, "backup failed");
        }
    }
}

/// Startup backup right away, then one every `period` until shutdown.
pub fn spawn_retention_task(
    manager: BackupManager,
    keep: usize,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        manager.run_once("startup", keep);
        let mut ticker = tokio::time::interval(period);
        // interval fires immediately; the startup run covered it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => manager.run_once("auto", keep),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_without_store_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = BackupManager::new(dir.path().join("db.json"), dir.path().join("backups"));
        let err = mgr.snapshot(None).unwrap_err();
        assert!(err.to_string().contains("Database not found"));
        // Directory is still created.
        assert!(dir.path().join("backups").is_dir());
    }

    #[test]
    fn snapshot_names_include_label() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.json");
        std::fs::write(&db, r#"{"guildConfigs":{}}"#).unwrap();
        let mgr = BackupManager::new(&db, dir.path().join("backups"));

        let p = mgr.snapshot(Some("manual")).unwrap();
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("db_backup_manual_"), "{name}");
        assert!(name.ends_with(".json"));
        assert_eq!(std::fs::read_to_string(p).unwrap(), r#"{"guildConfigs":{}}"#);
    }

    #[test]
    fn list_ignores_foreign_files_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = BackupManager::new(dir.path().join("db.json"), dir.path().join("nope"));
        assert!(mgr.list().unwrap().is_empty());
        assert_eq!(mgr.prune(3).unwrap(), 0);

        let bdir = dir.path().join("b");
        std::fs::create_dir_all(&bdir).unwrap();
        std::fs::write(bdir.join("notes.txt"), "x").unwrap();
        std::fs::write(bdir.join("db_backup_a.json"), "{}").unwrap();
        let mgr = BackupManager::new(dir.path().join("db.json"), &bdir);
        let names: Vec<_> = mgr.list().unwrap().into_iter().map(|b| b.filename).collect();
        assert_eq!(names, vec!["db_backup_a.json"]);
    }
}
