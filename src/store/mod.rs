// src/store/mod.rs
//! Durable bot state: which quakes were already announced (a FIFO-capped id
//! set) and which channel each guild wants alerts in.
//!
//! Every mutation is written through to the backend before it becomes
//! visible in memory; a failed write leaves the in-memory mirror untouched
//! and is returned to the caller.

pub mod backend;

use std::collections::{BTreeMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use backend::{JsonFileBackend, MemoryBackend, StoreBackend};

pub const SCHEMA_VERSION: &str = "2.0.0";
pub const DEFAULT_TRACKED_CAP: usize = 1000;

/// On-disk document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreData {
    #[serde(default)]
    pub guild_configs: BTreeMap<String, String>,
    /// Oldest first.
    #[serde(default)]
    pub tracked_quakes: VecDeque<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_updated")]
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_updated() -> DateTime<Utc> {
    Utc::now()
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            guild_configs: BTreeMap::new(),
            tracked_quakes: VecDeque::new(),
            version: default_version(),
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreStats {
    pub guilds: usize,
    pub tracked_quakes: usize,
    pub last_updated: DateTime<Utc>,
    pub version: String,
    pub location: String,
}

#[derive(Debug)]
struct State {
    data: StoreData,
    index: HashSet<String>,
}

impl State {
    fn new(data: StoreData) -> Self {
        let index = data.tracked_quakes.iter().cloned().collect();
        Self { data, index }
    }
}

pub struct Store {
    backend: Box<dyn StoreBackend>,
    cap: usize,
    state: Mutex<State>,
}

impl Store {
    /// Load persisted state or create and persist an empty document.
    pub async fn open<B: StoreBackend + 'static>(backend: B, cap: usize) -> Result<Self> {
        let cap = cap.max(1);
        let loaded = backend.load().await.context("loading store")?;
        let fresh = loaded.is_none();
        let mut data = loaded.unwrap_or_default();

        // Dedupe while keeping the first (oldest) occurrence, then apply the cap.
        let mut seen = HashSet::new();
        data.tracked_quakes.retain(|id| seen.insert(id.clone()));
        let trimmed = trim_to_cap(&mut data.tracked_quakes, cap);

        if fresh || trimmed > 0 {
            data.last_updated = Utc::now();
            backend.save(&data).await.context("writing initial store")?;
        }

        tracing::info!(
            location = %backend.location(),
            guilds = data.guild_configs.len(),
            tracked = data.tracked_quakes.len(),
            fresh,
            "store opened"
        );

        Ok(Self {
            backend: Box::new(backend),
            cap,
            state: Mutex::new(State::new(data)),
        })
    }

    // ----- tracked quakes -----

    pub async fn is_tracked(&self, quake_id: &str) -> bool {
        self.state.lock().await.index.contains(quake_id)
    }

    /// Current tracked ids, oldest first.
    pub async fn tracked_ids(&self) -> Vec<String> {
        self.state.lock().await.data.tracked_quakes.iter().cloned().collect()
    }

    /// Record a delivered quake. Returns `false` if it was already tracked.
    /// Oldest ids are evicted once the cap is exceeded.
    pub async fn mark_tracked(&self, quake_id: &str) -> Result<bool> {
        let mut st = self.state.lock().await;
        if st.index.contains(quake_id) {
            return Ok(false);
        }

        let mut next = st.data.clone();
        next.tracked_quakes.push_back(quake_id.to_string());
        let evicted = trim_to_cap(&mut next.tracked_quakes, self.cap);
        self.commit(&mut st, next).await?;

        if evicted > 0 {
            tracing::debug!(evicted, cap = self.cap, "evicted oldest tracked quakes");
        }
        Ok(true)
    }

    // ----- guild channels -----

    /// Link `channel_id` as the alert target for `guild_id`, replacing any
    /// previous link. Returns the previous channel, if any.
    pub async fn set_channel(&self, guild_id: &str, channel_id: &str) -> Result<Option<String>> {
        let mut st = self.state.lock().await;
        let previous = st.data.guild_configs.get(guild_id).cloned();
        if previous.as_deref() == Some(channel_id) {
            return Ok(previous);
        }

        let mut next = st.data.clone();
        next.guild_configs
            .insert(guild_id.to_string(), channel_id.to_string());
        self.commit(&mut st, next).await?;

        tracing::info!(guild_id, channel_id, "alert channel set");
        Ok(previous)
    }

    pub async fn channel(&self, guild_id: &str) -> Option<String> {
        self.state.lock().await.data.guild_configs.get(guild_id).cloned()
    }

    /// Unlink a guild. Returns the channel that was linked, if any.
    pub async fn remove_channel(&self, guild_id: &str) -> Result<Option<String>> {
        let mut st = self.state.lock().await;
        if !st.data.guild_configs.contains_key(guild_id) {
            return Ok(None);
        }

        let mut next = st.data.clone();
        let removed = next.guild_configs.remove(guild_id);
        self.commit(&mut st, next).await?;

        tracing::info!(guild_id, "alert channel removed");
        Ok(removed)
    }

    /// Every `(guild_id, channel_id)` pair as of the last committed write.
    pub async fn channels(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .await
            .data
            .guild_configs
            .iter()
            .map(|(g, c)| (g.clone(), c.clone()))
            .collect()
    }

    // ----- utility -----

    pub async fn stats(&self) -> StoreStats {
        let st = self.state.lock().await;
        StoreStats {
            guilds: st.data.guild_configs.len(),
            tracked_quakes: st.data.tracked_quakes.len(),
            last_updated: st.data.last_updated,
            version: st.data.version.clone(),
            location: self.backend.location(),
        }
    }

    /// The full document as pretty JSON, same shape as the file on disk.
    pub async fn export_json(&self) -> Result<String> {
        let st = self.state.lock().await;
        serde_json::to_string_pretty(&st.data).context("serializing store")
    }

    async fn commit(&self, st: &mut State, mut next: StoreData) -> Result<()> {
        next.last_updated = Utc::now();
        self.backend.save(&next).await.context("saving store")?;
        *st = State::new(next);
        Ok(())
    }
}

/// Drop from the front until `ids.len() <= cap`. Returns how many went.
fn trim_to_cap(ids: &mut VecDeque<String>, cap: usize) -> usize {
    let excess = ids.len().saturating_sub(cap);
    ids.drain(..excess);
    excess
}
