// src/notify/embed.rs
use chrono::{FixedOffset, SecondsFormat};
use serde::Serialize;

use super::map::StaticMap;
use crate::ingest::types::Quake;

/// Alerts are read in the Philippines; times render in UTC+08:00.
const DISPLAY_OFFSET_SECS: i32 = 8 * 3600;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedFooter {
    pub text: String,
}

/// Discord embed object, only the parts alerts use.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuakeEmbed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub image: EmbedImage,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

pub fn magnitude_color(mag: f64) -> u32 {
    if mag >= 7.0 {
        0xff0000
    } else if mag >= 6.0 {
        0xffa500
    } else if mag >= 5.0 {
        0xffff00
    } else {
        0x00ff00
    }
}

/// `18 Oct 2026 10:05 AM`, in display time.
pub fn display_time(q: &Quake) -> String {
    const FMT: &str = "%d %b %Y %I:%M %p";
    match FixedOffset::east_opt(DISPLAY_OFFSET_SECS) {
        Some(offset) => q.occurred_at.with_timezone(&offset).format(FMT).to_string(),
        None => q.occurred_at.format(FMT).to_string(),
    }
}

fn field(name: &str, value: String) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value,
        inline: true,
    }
}

impl QuakeEmbed {
    pub fn build(q: &Quake, map: &StaticMap) -> Self {
        let mag = format!("M{:.1}", q.magnitude);
        Self {
            title: format!("🚨 {mag} - {}", q.location),
            url: (!q.source_url.is_empty()).then(|| q.source_url.clone()),
            description: format!(
                "An earthquake of magnitude {:.1} occurred {}.",
                q.magnitude, q.location
            ),
            color: magnitude_color(q.magnitude),
            fields: vec![
                field("Time (PHT)", display_time(q)),
                field("Magnitude", mag),
                field("Depth", format!("{} km", q.depth_km)),
                field(
                    "Coordinates",
                    format!("Lat: {:.2}, Lon: {:.2}", q.latitude, q.longitude),
                ),
            ],
            image: EmbedImage {
                url: map.image_url(q.longitude, q.latitude, q.magnitude),
            },
            footer: EmbedFooter {
                text: format!("Data sourced from {}", q.source.label()),
            },
            timestamp: q.occurred_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}
