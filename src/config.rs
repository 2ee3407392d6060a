// src/config.rs
//! Runtime configuration: defaults, then an optional TOML file, then
//! environment variables (highest precedence).

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::types::SourceKind;

pub const ENV_CONFIG_PATH: &str = "TREMOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/tremor.toml";
/// Mounted volume inside the container image.
pub const DOCKER_DATA_DIR: &str = "/app/data";

const REQUIRED: &[&str] = &["DISCORD_BOT_TOKEN"];
const OPTIONAL: &[&str] = &[
    "MAPBOX_API_KEY",
    "POLLING_INTERVAL_MINUTES",
    "LOOKBACK_HOURS",
    "TRACKED_QUAKES_CAP",
    "DB_PATH",
    "BACKUP_DIR",
    "BACKUP_KEEP",
    "BACKUP_INTERVAL_HOURS",
    "FETCH_TIMEOUT_SECS",
    "DELIVERY_TIMEOUT_SECS",
    "QUAKE_SOURCES",
    "LISTEN_ADDR",
    "TRIGGER_COOLDOWN_SECS",
];

/// USGS is opt-in: its ids never match PHIVOLCS ids for the same quake.
const DEFAULT_SOURCES: &[&str] = &["phivolcs"];

/// Everything the TOML file may set. All keys optional.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub polling_interval_minutes: Option<u64>,
    pub lookback_hours: Option<u64>,
    pub tracked_quakes_cap: Option<usize>,
    pub db_path: Option<String>,
    pub backup_dir: Option<String>,
    pub backup_keep: Option<usize>,
    pub backup_interval_hours: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub delivery_timeout_secs: Option<u64>,
    pub sources: Option<Vec<String>>,
    pub listen_addr: Option<String>,
    pub trigger_cooldown_secs: Option<u64>,
    pub mapbox_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub discord_token: String,
    pub mapbox_token: Option<String>,
    pub poll_interval: Duration,
    pub lookback: Duration,
    pub tracked_cap: usize,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_keep: usize,
    pub backup_interval: Duration,
    pub fetch_timeout: Duration,
    pub delivery_timeout: Duration,
    pub sources: Vec<SourceKind>,
    pub listen_addr: SocketAddr,
    pub trigger_cooldown_secs: i64,
}

/// Load the TOML file from an explicit path.
pub fn load_file_config_from(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Load using env var + fallbacks:
/// 1) $TREMOR_CONFIG_PATH
/// 2) config/tremor.toml
/// 3) nothing (all defaults)
pub fn load_file_config_default() -> Result<FileConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_file_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if p.exists() {
        return load_file_config_from(&p);
    }
    Ok(FileConfig::default())
}

/// Store file: explicit override, else the container volume if mounted,
/// else `data/db.json` under the working directory.
pub fn resolve_db_path(explicit: Option<&str>, docker_dir: &Path) -> PathBuf {
    if let Some(p) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return PathBuf::from(p);
    }
    if docker_dir.exists() {
        return docker_dir.join("db.json");
    }
    PathBuf::from("data").join("db.json")
}

/// Backup directory, same fallback order as the store file.
pub fn resolve_backup_dir(explicit: Option<&str>, docker_dir: &Path) -> PathBuf {
    if let Some(p) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return PathBuf::from(p);
    }
    if docker_dir.exists() {
        return docker_dir.join("backups");
    }
    PathBuf::from("data").join("backups")
}

fn parse_sources(items: &[String]) -> Result<Vec<SourceKind>> {
    let mut out = Vec::new();
    for it in items.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let kind = SourceKind::parse(it).ok_or_else(|| anyhow!("unknown quake source `{it}`"))?;
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    if out.is_empty() {
        bail!("at least one quake source must be enabled");
    }
    Ok(out)
}

impl AppConfig {
    /// Process config: `.env` must already be loaded by the caller.
    pub fn load() -> Result<Self> {
        let file = load_file_config_default()?;
        Self::resolve(file, |k| std::env::var(k).ok(), Path::new(DOCKER_DATA_DIR))
    }

    /// Merge file values with `env` lookups. Missing required keys and
    /// malformed values are errors.
    pub fn resolve<F>(file: FileConfig, env: F, docker_dir: &Path) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| env(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&str> = REQUIRED.iter().copied().filter(|k| get(*k).is_none()).collect();
        if !missing.is_empty() {
            bail!("missing required environment variables: {}", missing.join(", "));
        }
        let discord_token = get("DISCORD_BOT_TOKEN").unwrap_or_default();

        let num = |key: &str, from_file: Option<u64>, default: u64| -> Result<u64> {
            match get(key) {
                Some(v) => v
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a non-negative integer, got `{v}`")),
                None => Ok(from_file.unwrap_or(default)),
            }
        };

        let poll_minutes = num("POLLING_INTERVAL_MINUTES", file.polling_interval_minutes, 5)?;
        let lookback_hours = num("LOOKBACK_HOURS", file.lookback_hours, 6)?;
        let cap = num(
            "TRACKED_QUAKES_CAP",
            file.tracked_quakes_cap.map(|v| v as u64),
            crate::store::DEFAULT_TRACKED_CAP as u64,
        )?;
        let keep = num(
            "BACKUP_KEEP",
            file.backup_keep.map(|v| v as u64),
            crate::backup::DEFAULT_KEEP as u64,
        )?;
        let backup_hours = num("BACKUP_INTERVAL_HOURS", file.backup_interval_hours, 24)?;
        let fetch_secs = num("FETCH_TIMEOUT_SECS", file.fetch_timeout_secs, 30)?;
        let delivery_secs = num("DELIVERY_TIMEOUT_SECS", file.delivery_timeout_secs, 15)?;
        let cooldown = num("TRIGGER_COOLDOWN_SECS", file.trigger_cooldown_secs, 60)?;

        if poll_minutes == 0 || lookback_hours == 0 || cap == 0 || backup_hours == 0 {
            bail!("polling interval, lookback, tracked cap and backup interval must be positive");
        }
        if fetch_secs == 0 || delivery_secs == 0 {
            bail!("fetch and delivery timeouts must be positive");
        }

        let sources = match get("QUAKE_SOURCES") {
            Some(v) => parse_sources(&v.split(',').map(str::to_string).collect::<Vec<_>>())?,
            None => parse_sources(
                &file
                    .sources
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect()),
            )?,
        };

        let listen = get("LISTEN_ADDR")
            .or(file.listen_addr.clone())
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let listen_addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("LISTEN_ADDR must be host:port, got `{listen}`"))?;

        let db_explicit = get("DB_PATH").or(file.db_path.clone());
        let backup_explicit = get("BACKUP_DIR").or(file.backup_dir.clone());

        Ok(Self {
            discord_token,
            mapbox_token: get("MAPBOX_API_KEY").or(file.mapbox_api_key.clone()),
            poll_interval: Duration::from_secs(poll_minutes * 60),
            lookback: Duration::from_secs(lookback_hours * 3600),
            tracked_cap: cap as usize,
            db_path: resolve_db_path(db_explicit.as_deref(), docker_dir),
            backup_dir: resolve_backup_dir(backup_explicit.as_deref(), docker_dir),
            backup_keep: keep as usize,
            backup_interval: Duration::from_secs(backup_hours * 3600),
            fetch_timeout: Duration::from_secs(fetch_secs),
            delivery_timeout: Duration::from_secs(delivery_secs),
            sources,
            listen_addr,
            trigger_cooldown_secs: cooldown.min(i64::MAX as u64) as i64,
        })
    }

    /// Names of optional variables that are not set, for a startup warning.
    pub fn unset_optional<F>(env: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        OPTIONAL
            .iter()
            .copied()
            .filter(|k| env(*k).map(|v| v.trim().is_empty()).unwrap_or(true))
            .collect()
    }
}
