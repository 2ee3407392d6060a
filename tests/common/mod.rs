// tests/common/mod.rs
//
// Shared fakes for the integration tests: a recording notifier, a fixed
// provider, and small builders for quakes and pipelines.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use tremor_watch::dispatch::Dispatcher;
use tremor_watch::ingest::types::{Quake, QuakeProvider, SourceKind};
use tremor_watch::ingest::Feed;
use tremor_watch::notify::Notifier;
use tremor_watch::pipeline::Pipeline;
use tremor_watch::store::backend::MemoryBackend;
use tremor_watch::store::Store;

pub const GUILD_A: &str = "100000000000000001";
pub const GUILD_B: &str = "100000000000000002";
pub const GUILD_C: &str = "100000000000000003";
pub const CHANNEL_A: &str = "200000000000000001";
pub const CHANNEL_B: &str = "200000000000000002";
pub const CHANNEL_C: &str = "200000000000000003";

pub fn quake(id: &str, occurred_at: DateTime<Utc>, magnitude: f64) -> Quake {
    Quake {
        id: id.to_string(),
        occurred_at,
        magnitude,
        location: format!("{id} near Test Town"),
        latitude: 12.5,
        longitude: 124.1,
        depth_km: 10.0,
        source_url: format!("https://example.test/{id}"),
        source: SourceKind::Usgs,
    }
}

/// Minutes before now, so quakes land inside any realistic lookback.
pub fn minutes_ago(m: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(m)
}

pub fn fixed_time(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, h, m, 0).unwrap()
}

/// Records every (channel, quake id) it is asked to send, in call order.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_channel(&self, channel_id: &str) {
        self.failing.lock().unwrap().insert(channel_id.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn ids_for(&self, channel_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| c == channel_id)
            .map(|(_, id)| id)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel_id: &str, quake: &Quake) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), quake.id.clone()));
        if self.failing.lock().unwrap().contains(channel_id) {
            anyhow::bail!("channel {channel_id} rejected the message");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Returns whatever the test put in, newest first like the real feeds.
#[derive(Clone, Default)]
pub struct StaticProvider {
    items: Arc<Mutex<Vec<Quake>>>,
}

impl StaticProvider {
    pub fn new(items: Vec<Quake>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items)),
        }
    }

    pub fn set(&self, items: Vec<Quake>) {
        *self.items.lock().unwrap() = items;
    }
}

#[async_trait]
impl QuakeProvider for StaticProvider {
    async fn fetch_recent(&self, _lookback: Duration) -> Result<Vec<Quake>> {
        Ok(self.items.lock().unwrap().clone())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Usgs
    }
}

pub async fn memory_store() -> Arc<Store> {
    Arc::new(Store::open(MemoryBackend::new(), 1000).await.unwrap())
}

pub fn pipeline_with(
    provider: StaticProvider,
    store: Arc<Store>,
    notifier: Arc<RecordingNotifier>,
) -> Pipeline {
    let dispatcher = Dispatcher::new(store.clone(), notifier, Duration::from_secs(5));
    Pipeline::new(
        vec![Feed::new(Box::new(provider), Duration::from_secs(5))],
        store,
        dispatcher,
        Duration::from_secs(6 * 3600),
    )
}
