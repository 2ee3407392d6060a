// src/ingest/providers/usgs.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::ingest::collapse_ws;
use crate::ingest::types::{Quake, QuakeProvider, SourceKind};

pub const USGS_QUERY_URL: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";
pub const USGS_MIN_MAGNITUDE: f64 = 4.5;
/// Threshold for the worldwide "latest quake" lookup.
pub const USGS_GLOBAL_MIN_MAGNITUDE: f64 = 2.5;

/// Latitude/longitude rectangle, degrees.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

/// Philippine area of responsibility.
pub const PHILIPPINES_BBOX: BoundingBox = BoundingBox {
    min_latitude: 4.0,
    max_latitude: 21.0,
    min_longitude: 116.0,
    max_longitude: 130.0,
};

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    properties: Properties,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Properties {
    mag: Option<f64>,
    place: Option<String>,
    /// Unix milliseconds.
    time: i64,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// [longitude, latitude, depth]
    coordinates: Vec<f64>,
}

/// Parse a GeoJSON body from the FDSN event service.
/// Features without a magnitude or a full coordinate triple are skipped.
pub fn parse_feed(body: &str) -> Result<Vec<Quake>> {
    let fc: FeatureCollection = serde_json::from_str(body).context("parsing usgs geojson")?;

    let mut out = Vec::with_capacity(fc.features.len());
    for f in fc.features {
        let Some(mag) = f.properties.mag else {
            continue;
        };
        let [lon, lat, depth] = match f.geometry.coordinates.as_slice() {
            [lon, lat, depth, ..] => [*lon, *lat, *depth],
            _ => continue,
        };
        let Some(occurred_at) = DateTime::<Utc>::from_timestamp_millis(f.properties.time) else {
            continue;
        };

        out.push(Quake {
            id: f.id,
            occurred_at,
            magnitude: mag,
            location: collapse_ws(f.properties.place.as_deref().unwrap_or("Unknown location")),
            latitude: lat,
            longitude: lon,
            depth_km: depth,
            source_url: f.properties.url.unwrap_or_default(),
            source: SourceKind::Usgs,
        });
    }
    Ok(out)
}

pub struct UsgsProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        min_magnitude: f64,
        bbox: Option<BoundingBox>,
    },
}

impl UsgsProvider {
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn new(client: reqwest::Client) -> Self {
        Self::with_url(client, USGS_QUERY_URL)
    }

    pub fn with_url(client: reqwest::Client, url: &str) -> Self {
        Self {
            mode: Mode::Http {
                url: url.to_string(),
                client,
                min_magnitude: USGS_MIN_MAGNITUDE,
                bbox: Some(PHILIPPINES_BBOX),
            },
        }
    }

    /// Worldwide, M2.5 and up.
    pub fn global(client: reqwest::Client) -> Self {
        Self::new(client)
            .with_bbox(None)
            .with_min_magnitude(USGS_GLOBAL_MIN_MAGNITUDE)
    }

    /// `None` queries the whole globe.
    pub fn with_bbox(mut self, area: Option<BoundingBox>) -> Self {
        if let Mode::Http { bbox, .. } = &mut self.mode {
            *bbox = area;
        }
        self
    }

    pub fn with_min_magnitude(mut self, mag: f64) -> Self {
        if let Mode::Http { min_magnitude, .. } = &mut self.mode {
            *min_magnitude = mag;
        }
        self
    }
}

fn query_params(
    start: String,
    min_magnitude: f64,
    bbox: Option<BoundingBox>,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("format", "geojson".to_string()),
        ("starttime", start),
        ("minmagnitude", min_magnitude.to_string()),
        ("orderby", "time".to_string()),
    ];
    if let Some(b) = bbox {
        params.extend([
            ("minlatitude", b.min_latitude.to_string()),
            ("maxlatitude", b.max_latitude.to_string()),
            ("minlongitude", b.min_longitude.to_string()),
            ("maxlongitude", b.max_longitude.to_string()),
        ]);
    }
    params
}

#[async_trait]
impl QuakeProvider for UsgsProvider {
    async fn fetch_recent(&self, lookback: Duration) -> Result<Vec<Quake>> {
        match &self.mode {
            Mode::Fixture(s) => parse_feed(s),
            Mode::Http {
                url,
                client,
                min_magnitude,
                bbox,
            } => {
                let window = chrono::Duration::from_std(lookback).context("lookback out of range")?;
                let start = (Utc::now() - window).to_rfc3339_opts(SecondsFormat::Secs, true);
                let params = query_params(start, *min_magnitude, *bbox);
                let body = client
                    .get(url)
                    .query(&params)
                    .send()
                    .await
                    .context("usgs http get()")?
                    .error_for_status()
                    .context("usgs non-2xx")?
                    .text()
                    .await
                    .context("usgs http .text()")?;
                parse_feed(&body)
            }
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Usgs
    }
}
