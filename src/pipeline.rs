// src/pipeline.rs
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics::gauge;

use crate::dispatch::{DispatchSummary, Dispatcher};
use crate::ingest::{self, types::Quake, Feed};
use crate::store::Store;

/// One fetch -> dedupe -> dispatch pass over every configured source.
pub struct Pipeline {
    feeds: Vec<Feed>,
    store: Arc<Store>,
    dispatcher: Dispatcher,
    lookback: Duration,
}

impl Pipeline {
    pub fn new(feeds: Vec<Feed>, store: Arc<Store>, dispatcher: Dispatcher, lookback: Duration) -> Self {
        Self {
            feeds,
            store,
            dispatcher,
            lookback,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Not safe to run concurrently with itself; `Scheduler` serializes calls.
    pub async fn run_cycle(&self) -> Result<DispatchSummary> {
        let tracked: HashSet<String> = self.store.tracked_ids().await.into_iter().collect();
        let fresh = ingest::collect_new(&self.feeds, self.lookback, |id| tracked.contains(id)).await;

        let now = chrono::Utc::now().timestamp().max(0);
        gauge!("pipeline_last_run_ts").set(now as f64);
        tracing::debug!(target: "pipeline", candidates = fresh.len(), "cycle fetched");

        self.dispatcher.dispatch(&fresh).await
    }

    /// Everything the sources currently report within `lookback`, newest
    /// first, regardless of what was already announced. With
    /// `include_seen == false` each source only returns ids it has not
    /// handed out through this call before.
    pub async fn recent(&self, lookback: Duration, include_seen: bool) -> Vec<Quake> {
        let mut all = Vec::new();
        for feed in &self.feeds {
            all.extend(feed.fetch(lookback, include_seen).await);
        }
        all.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        all
    }
}
