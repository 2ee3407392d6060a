// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::ingest::types::{Quake, QuakeProvider, SourceKind};

/// How long the adapter-level seen-id set lives before it is wiped.
pub const SEEN_CLEAR_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_quakes_total", "Quakes parsed from providers.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors and timeouts."
        );
        describe_histogram!("ingest_fetch_ms", "Provider fetch+parse time in milliseconds.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when the polling pipeline last ran."
        );
    });
}

/// Collapse every whitespace run to a single space and trim.
pub fn collapse_ws(s: &str) -> String {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s, " ").trim().to_string()
}

#[derive(Debug)]
struct SeenIds {
    ids: HashSet<String>,
    cleared_at: Instant,
}

/// A provider plus the fetch boundary policy: bounded time, never an error.
///
/// Also keeps its own in-memory set of ids it has already handed out, used
/// when a caller asks for an incremental feed instead of a full snapshot.
pub struct Feed {
    provider: Box<dyn QuakeProvider>,
    timeout: Duration,
    clear_every: Duration,
    seen: Mutex<SeenIds>,
}

impl Feed {
    pub fn new(provider: Box<dyn QuakeProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            clear_every: SEEN_CLEAR_INTERVAL,
            seen: Mutex::new(SeenIds {
                ids: HashSet::new(),
                cleared_at: Instant::now(),
            }),
        }
    }

    pub fn with_clear_interval(mut self, every: Duration) -> Self {
        self.clear_every = every;
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.provider.kind()
    }

    /// Fetch quakes within `lookback`, newest first.
    ///
    /// With `include_seen == false` ids returned by an earlier call are
    /// dropped and the rest are remembered. Failures and timeouts yield an
    /// empty list.
    pub async fn fetch(&self, lookback: Duration, include_seen: bool) -> Vec<Quake> {
        ensure_metrics_described();
        let provider = self.kind().name();

        let t0 = Instant::now();
        let res = tokio::time::timeout(self.timeout, self.provider.fetch_recent(lookback)).await;
        histogram!("ingest_fetch_ms", "provider" => provider)
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        let quakes = match res {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, provider, "provider error");
                counter!("ingest_provider_errors_total", "provider" => provider).increment(1);
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(provider, timeout_secs = self.timeout.as_secs(), "provider timed out");
                counter!("ingest_provider_errors_total", "provider" => provider).increment(1);
                return Vec::new();
            }
        };
        counter!("ingest_quakes_total", "provider" => provider).increment(quakes.len() as u64);

        if include_seen {
            return quakes;
        }

        let mut seen = match self.seen.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        if seen.cleared_at.elapsed() > self.clear_every {
            tracing::info!(provider, cleared = seen.ids.len(), "clearing seen quake ids");
            seen.ids.clear();
            seen.cleared_at = Instant::now();
        }
        quakes
            .into_iter()
            .filter(|q| seen.ids.insert(q.id.clone()))
            .collect()
    }
}

/// Reports from different sources closer than this are one quake.
pub const SAME_EVENT_WINDOW: Duration = Duration::from_secs(120);
pub const SAME_EVENT_DEGREES: f64 = 0.5;

/// Ids never match across sources, so match on time and place instead.
pub fn same_event(a: &Quake, b: &Quake) -> bool {
    let window = SAME_EVENT_WINDOW.as_secs() as i64;
    a.source != b.source
        && (a.occurred_at - b.occurred_at).num_seconds().abs() <= window
        && (a.latitude - b.latitude).abs() <= SAME_EVENT_DEGREES
        && (a.longitude - b.longitude).abs() <= SAME_EVENT_DEGREES
}

/// Gather from every feed, keep unseen ids once, and order oldest first.
///
/// Feeds are in priority order: a quake already reported by an earlier
/// feed (tracked or not) is dropped from later ones. `is_tracked` is
/// consulted per id so callers decide what "already delivered" means.
pub async fn collect_new<F>(feeds: &[Feed], lookback: Duration, is_tracked: F) -> Vec<Quake>
where
    F: Fn(&str) -> bool,
{
    let mut out = Vec::new();
    let mut ids = HashSet::new();
    let mut reported: Vec<Quake> = Vec::new();
    for feed in feeds {
        let mut batch = feed.fetch(lookback, true).await;
        // Sources list newest first.
        batch.reverse();
        let mut accepted = Vec::with_capacity(batch.len());
        for q in batch {
            if !ids.insert(q.id.clone()) {
                continue;
            }
            if let Some(prior) = reported.iter().find(|r| same_event(r, &q)) {
                tracing::debug!(
                    quake_id = %q.id,
                    duplicate_of = %prior.id,
                    provider = q.source.name(),
                    "same quake already reported by another source"
                );
                continue;
            }
            if !is_tracked(&q.id) {
                out.push(q.clone());
            }
            accepted.push(q);
        }
        reported.extend(accepted);
    }
    // Stable: ties keep per-source chronological order.
    out.sort_by_key(|q| q.occurred_at);
    out
}
