// src/ingest/types.rs
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Which bulletin a quake came from.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Phivolcs,
    Usgs,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Phivolcs => "phivolcs",
            SourceKind::Usgs => "usgs",
        }
    }

    /// Human label used in alert footers.
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Phivolcs => "PHIVOLCS",
            SourceKind::Usgs => "USGS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phivolcs" => Some(SourceKind::Phivolcs),
            "usgs" => Some(SourceKind::Usgs),
            _ => None,
        }
    }
}

/// One detected earthquake, rebuilt from source data on every poll.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Quake {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    pub magnitude: f64,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub source_url: String,
    pub source: SourceKind,
}

/// A bulletin that can be queried for recent quakes.
///
/// Implementations return source-native ordering (newest first) and report
/// transport/parse failures as errors; `Feed` turns those into empty results.
#[async_trait::async_trait]
pub trait QuakeProvider: Send + Sync {
    async fn fetch_recent(&self, lookback: Duration) -> Result<Vec<Quake>>;
    fn kind(&self) -> SourceKind;
}
