//! Operator HTTP surface: manual trigger, channel linking, and read-only
//! views. Every reply is a short human-readable status, never an error dump.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::ingest::types::{Quake, QuakeProvider};
use crate::ratelimit::{format_wait, CommandCooldown};
use crate::scheduler::Scheduler;
use crate::store::{Store, StoreStats};

pub const REQUESTER_HEADER: &str = "x-requested-by";
const TRIGGER_COMMAND: &str = "request-update";
const GLOBAL_COMMAND: &str = "get-global-quake";
pub const GLOBAL_COOLDOWN_SECS: i64 = 30;
const GLOBAL_LOOKBACK: Duration = Duration::from_secs(6 * 3600);
const MAX_RECENT_HOURS: u64 = 72;

#[derive(Clone)]
pub struct AppState {
    scheduler: Scheduler,
    store: Arc<Store>,
    cooldowns: Arc<Mutex<CommandCooldown>>,
    trigger_cooldown_secs: i64,
    global: Option<Arc<dyn QuakeProvider>>,
}

impl AppState {
    pub fn new(scheduler: Scheduler, trigger_cooldown_secs: i64) -> Self {
        let store = scheduler.pipeline().store().clone();
        Self {
            scheduler,
            store,
            cooldowns: Arc::new(Mutex::new(CommandCooldown::new())),
            trigger_cooldown_secs,
            global: None,
        }
    }

    /// Worldwide feed behind `/quakes/global`; the route answers 503 without one.
    pub fn with_global(mut self, provider: Arc<dyn QuakeProvider>) -> Self {
        self.global = Some(provider);
        self
    }

    /// `Err(seconds)` while `caller` is still cooling down for `command`.
    fn cooldown(&self, command: &str, caller: &str, secs: i64) -> Result<(), i64> {
        let mut cd = match self.cooldowns.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        cd.check(command, caller, secs, chrono::Utc::now())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/trigger", post(trigger))
        .route(
            "/guilds/{guild_id}/channel",
            get(show_channel).put(set_channel).delete(remove_channel),
        )
        .route("/stats", get(stats))
        .route("/export", get(export))
        .route("/quakes/recent", get(recent_quakes))
        .route("/quakes/global", get(global_quake))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Discord snowflakes are 17-19 digits.
pub fn is_valid_snowflake(id: &str) -> bool {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{17,19}$").unwrap());
    RE.is_match(id)
}

fn requester(headers: &HeaderMap) -> String {
    headers
        .get(REQUESTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn save_failed(e: anyhow::Error, guild_id: &str) -> (StatusCode, String) {
    tracing::error!(guild_id, error = ?e, "store write failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Could not save the setting right now. Please try again later.".to_string(),
    )
}

async fn trigger(State(state): State<AppState>, headers: HeaderMap) -> (StatusCode, String) {
    let caller = requester(&headers);
    if let Err(secs) = state.cooldown(TRIGGER_COMMAND, &caller, state.trigger_cooldown_secs) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "⏳ Please wait {} before requesting another update.",
                format_wait(secs)
            ),
        );
    }

    tracing::info!(caller = %caller, "manual cycle requested");
    (StatusCode::OK, state.scheduler.trigger_now().await)
}

async fn show_channel(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
) -> (StatusCode, String) {
    match state.store.channel(&guild_id).await {
        Some(ch) => (
            StatusCode::OK,
            format!("This server has an earthquake alert channel set to <#{ch}>."),
        ),
        None => (
            StatusCode::NOT_FOUND,
            "This server does not have an earthquake alert channel set.".to_string(),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct SetChannelReq {
    channel_id: String,
}

async fn set_channel(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Json(body): Json<SetChannelReq>,
) -> (StatusCode, String) {
    if !is_valid_snowflake(&guild_id) {
        return (
            StatusCode::BAD_REQUEST,
            "Invalid server ID. Server IDs must be 17-19 digit numbers.".to_string(),
        );
    }
    let channel_id = body.channel_id.trim();
    if !is_valid_snowflake(channel_id) {
        return (
            StatusCode::BAD_REQUEST,
            "Invalid channel ID format. Channel IDs must be 17-19 digit numbers.".to_string(),
        );
    }

    match state.store.set_channel(&guild_id, channel_id).await {
        Ok(_) => (
            StatusCode::OK,
            format!(
                "✅ Earthquake alert channel set to <#{channel_id}>. \
                 The bot will send earthquake alerts to this channel when new earthquakes are detected."
            ),
        ),
        Err(e) => save_failed(e, &guild_id),
    }
}

async fn remove_channel(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
) -> (StatusCode, String) {
    match state.store.remove_channel(&guild_id).await {
        Ok(Some(_)) => (
            StatusCode::OK,
            "✅ Earthquake alert channel unlinked successfully. \
             The bot will no longer send earthquake alerts to this server."
                .to_string(),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            "This server does not have an earthquake alert channel set.".to_string(),
        ),
        Err(e) => save_failed(e, &guild_id),
    }
}

async fn stats(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.store.stats().await)
}

async fn export(State(state): State<AppState>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    match state.store.export_json().await {
        Ok(body) => {
            headers.insert(
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderValue::from_static("application/json"),
            );
            (StatusCode::OK, headers, body)
        }
        Err(e) => {
            tracing::error!(error = ?e, "store export failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                "Could not export the store right now.".to_string(),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    hours: Option<u64>,
    #[serde(default)]
    fresh: bool,
}

async fn recent_quakes(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Json<Vec<Quake>> {
    let pipeline = state.scheduler.pipeline();
    let lookback = match q.hours {
        Some(h) => Duration::from_secs(h.clamp(1, MAX_RECENT_HOURS) * 3600),
        None => pipeline.lookback(),
    };
    Json(pipeline.recent(lookback, !q.fresh).await)
}

async fn global_quake(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(provider) = state.global.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Global earthquake lookups are not enabled.",
        )
            .into_response();
    };

    let caller = requester(&headers);
    if let Err(secs) = state.cooldown(GLOBAL_COMMAND, &caller, GLOBAL_COOLDOWN_SECS) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "⏳ Please wait {} before requesting another earthquake update.",
                format_wait(secs)
            ),
        )
            .into_response();
    }

    match provider.fetch_recent(GLOBAL_LOOKBACK).await {
        Ok(quakes) => match quakes.into_iter().max_by_key(|q| q.occurred_at) {
            Some(q) => Json(q).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                "No recent earthquakes found in the last 6 hours.",
            )
                .into_response(),
        },
        Err(e) => {
            tracing::warn!(caller = %caller, error = ?e, "global quake lookup failed");
            (
                StatusCode::BAD_GATEWAY,
                "Failed to fetch earthquake data. Please try again later.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_format() {
        assert!(is_valid_snowflake("123456789012345678"));
        assert!(!is_valid_snowflake("1234"));
        assert!(!is_valid_snowflake("12345678901234567a"));
        assert!(!is_valid_snowflake("12345678901234567890"));
    }

    #[test]
    fn requester_defaults_to_anonymous() {
        let mut h = HeaderMap::new();
        assert_eq!(requester(&h), "anonymous");
        h.insert(REQUESTER_HEADER, "ops-bot".parse().unwrap());
        assert_eq!(requester(&h), "ops-bot");
    }
}
