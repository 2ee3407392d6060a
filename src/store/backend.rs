// src/store/backend.rs
//! Where the store document lives. The JSON file backend writes to a
//! sibling `.tmp` file and renames it over the real one, so the file on disk
//! is always either the previous or the new complete document.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StoreData;

#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    async fn load(&self) -> Result<Option<StoreData>>;
    async fn save(&self, data: &StoreData) -> Result<()>;
    /// Human-readable location for stats output.
    fn location(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn temp_path(&self) -> PathBuf {
        let mut s = self.path.clone().into_os_string();
        s.push(".tmp");
        PathBuf::from(s)
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut s = self.path.clone().into_os_string();
        s.push(".corrupt");
        PathBuf::from(s)
    }
}

#[async_trait]
impl StoreBackend for JsonFileBackend {
    async fn load(&self) -> Result<Option<StoreData>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading store {}", self.path.display()))
            }
        };

        match serde_json::from_str::<StoreData>(&raw) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                // Keep the bytes for a human to look at; start over.
                let aside = self.corrupt_path();
                tracing::error!(
                    error = %e,
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    "store file is not valid JSON; starting empty"
                );
                fs::rename(&self.path, &aside)
                    .await
                    .with_context(|| format!("moving corrupt store to {}", aside.display()))?;
                Ok(None)
            }
        }
    }

    async fn save(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating store dir {}", parent.display()))?;
            }
        }

        let bytes = serde_json::to_vec_pretty(data).context("serializing store")?;
        let tmp = self.temp_path();
        {
            let mut f = fs::File::create(&tmp)
                .await
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(&bytes)
                .await
                .with_context(|| format!("writing {}", tmp.display()))?;
            f.sync_all()
                .await
                .with_context(|| format!("syncing {}", tmp.display()))?;
        }
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Keeps the last saved document in memory. Saves can be made to fail for
/// exercising the write-error path.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    saved: Mutex<Option<StoreData>>,
    fail_saves: Mutex<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: StoreData) -> Self {
        Self {
            saved: Mutex::new(Some(data)),
            fail_saves: Mutex::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    pub fn saved(&self) -> Option<StoreData> {
        self.saved.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<StoreData>> {
        Ok(self.saved())
    }

    async fn save(&self, data: &StoreData) -> Result<()> {
        if *self.fail_saves.lock().unwrap_or_else(|p| p.into_inner()) {
            anyhow::bail!("memory backend: save refused");
        }
        *self.saved.lock().unwrap_or_else(|p| p.into_inner()) = Some(data.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Shared handles work as backends too, so tests can keep a reference.
#[async_trait]
impl<B: StoreBackend + ?Sized> StoreBackend for std::sync::Arc<B> {
    async fn load(&self) -> Result<Option<StoreData>> {
        (**self).load().await
    }

    async fn save(&self, data: &StoreData) -> Result<()> {
        (**self).save(data).await
    }

    fn location(&self) -> String {
        (**self).location()
    }
}
