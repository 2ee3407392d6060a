// src/ingest/providers/phivolcs.rs
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::ingest::collapse_ws;
use crate::ingest::types::{Quake, QuakeProvider, SourceKind};

pub const PHIVOLCS_URL: &str = "https://earthquake.phivolcs.dost.gov.ph/";
pub const PHIVOLCS_MIN_MAGNITUDE: f64 = 4.0;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Bulletin times are Philippine Standard Time.
const PHT_OFFSET_SECS: i32 = 8 * 3600;
const TIME_FORMAT: &str = "%d %B %Y - %I:%M %p";

static TABLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("table.MsoNormalTable").unwrap());
static ROW_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static LINK_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());

fn cell_text(cell: &ElementRef<'_>) -> String {
    collapse_ws(&cell.text().collect::<String>())
}

/// Parse `18 October 2026 - 10:05 AM` (Philippine time) into UTC.
pub fn parse_bulletin_time(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(&collapse_ws(s), TIME_FORMAT).ok()?;
    let pht = FixedOffset::east_opt(PHT_OFFSET_SECS)?;
    pht.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Stable id from the bulletin's own fields: date text + lat + long, with
/// every whitespace run turned into `-`.
pub fn bulletin_id(date_time: &str, lat: f64, lon: f64) -> String {
    static RE_WS: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"\s+").unwrap());
    RE_WS
        .replace_all(&format!("{date_time}{lat}{lon}"), "-")
        .to_string()
}

fn resolve_bulletin(origin: &Url, href: Option<&str>) -> String {
    let Some(href) = href.map(|h| h.trim().replace('\\', "/")) else {
        return origin.to_string();
    };
    origin
        .join(&href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| origin.to_string())
}

/// Extract quakes from the PHIVOLCS landing page.
///
/// Rows are newest first; scanning stops at the first row outside
/// `lookback` of `now`. Rows under `min_magnitude` or with unparsable cells
/// are skipped. A page without the bulletin table is an error.
pub fn parse_bulletin_table(
    html: &str,
    origin: &Url,
    now: DateTime<Utc>,
    lookback: Duration,
    min_magnitude: f64,
) -> Result<Vec<Quake>> {
    let doc = Html::parse_document(html);
    let table = doc
        .select(&TABLE_SEL)
        .find(|t| {
            let text = t.text().collect::<String>();
            text.contains("Date - Time") || text.contains("Philippine Time")
        })
        .ok_or_else(|| anyhow!("could not find the earthquake data table"))?;

    let window = chrono::Duration::from_std(lookback).context("lookback out of range")?;
    let mut out = Vec::new();

    for row in table.select(&ROW_SEL) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL_SEL).collect();
        if cells.len() < 6 {
            continue;
        }

        let date_time = cell_text(&cells[0]);
        let Some(occurred_at) = parse_bulletin_time(&date_time) else {
            // Header rows and malformed dates.
            continue;
        };
        if (occurred_at - now).abs() > window {
            break;
        }

        let num = |i: usize| cell_text(&cells[i]).parse::<f64>().ok();
        let (Some(lat), Some(lon), Some(depth), Some(mag)) = (num(1), num(2), num(3), num(4)) else {
            tracing::debug!(date_time = %date_time, "skipping row with unparsable numbers");
            continue;
        };
        if mag < min_magnitude {
            continue;
        }

        let href = cells[0]
            .select(&LINK_SEL)
            .next()
            .and_then(|a| a.value().attr("href"));

        out.push(Quake {
            id: bulletin_id(&date_time, lat, lon),
            occurred_at,
            magnitude: mag,
            location: cell_text(&cells[5]),
            latitude: lat,
            longitude: lon,
            depth_km: depth,
            source_url: resolve_bulletin(origin, href),
            source: SourceKind::Phivolcs,
        });
    }

    Ok(out)
}

pub struct PhivolcsProvider {
    origin: Url,
    client: reqwest::Client,
    min_magnitude: f64,
}

impl PhivolcsProvider {
    /// The origin serves a certificate chain most verifiers reject, so this
    /// client skips verification and is used for nothing else.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_origin(PHIVOLCS_URL, timeout)
    }

    pub fn with_origin(origin: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .context("building phivolcs http client")?;

        Ok(Self {
            origin: Url::parse(origin).context("parsing phivolcs origin")?,
            client,
            min_magnitude: PHIVOLCS_MIN_MAGNITUDE,
        })
    }

    pub fn with_min_magnitude(mut self, mag: f64) -> Self {
        self.min_magnitude = mag;
        self
    }
}

#[async_trait]
impl QuakeProvider for PhivolcsProvider {
    async fn fetch_recent(&self, lookback: Duration) -> Result<Vec<Quake>> {
        let body = self
            .client
            .get(self.origin.clone())
            .send()
            .await
            .context("phivolcs http get()")?
            .error_for_status()
            .context("phivolcs non-2xx")?
            .text()
            .await
            .context("phivolcs http .text()")?;
        parse_bulletin_table(&body, &self.origin, Utc::now(), lookback, self.min_magnitude)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Phivolcs
    }
}
