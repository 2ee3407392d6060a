use super::embed::QuakeEmbed;
use super::map::StaticMap;
use super::Notifier;
use crate::ingest::types::Quake;
use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(250);
/// Longest `Retry-After` we are willing to sleep through.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Posts alert embeds to guild text channels through the bot REST API.
#[derive(Clone)]
pub struct DiscordNotifier {
    token: String,
    api_base: String,
    client: Client,
    map: StaticMap,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(token: String) -> Self {
        Self {
            token,
            api_base: DISCORD_API_BASE.to_string(),
            client: Client::new(),
            map: StaticMap::Yandex,
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    /// Fit every attempt and the backoff sleeps between them inside
    /// `budget`, the deadline the caller puts on a whole `send`.
    pub fn with_delivery_budget(mut self, budget: Duration) -> Self {
        self.timeout = attempt_timeout(budget, self.max_retries);
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn with_map(mut self, map: StaticMap) -> Self {
        self.map = map;
        self
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel_id)
    }
}

/// 429 and 5xx are worth another try; anything else (403 missing access,
/// 404 unknown channel, 400 bad payload) will not change on retry.
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: u8) -> Duration {
    Duration::from_millis(500u64 << (attempt.saturating_sub(1)).min(6))
}

fn attempt_timeout(budget: Duration, attempts: u8) -> Duration {
    let attempts = attempts.max(1);
    let sleeps: Duration = (1..attempts).map(backoff).sum();
    (budget.saturating_sub(sleeps) / u32::from(attempts)).max(MIN_ATTEMPT_TIMEOUT)
}

/// `Retry-After` in (possibly fractional) seconds, capped.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs).min(MAX_RETRY_AFTER))
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, channel_id: &str, quake: &Quake) -> Result<()> {
        let payload = DiscordMessagePayload {
            embeds: vec![QuakeEmbed::build(quake, &self.map)],
        };
        let url = self.messages_url(channel_id);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    if is_retryable(status) && attempt < self.max_retries {
                        let wait = match status {
                            StatusCode::TOO_MANY_REQUESTS => {
                                retry_after(rsp.headers()).unwrap_or_else(|| backoff(attempt))
                            }
                            _ => backoff(attempt),
                        };
                        tracing::debug!(
                            channel_id,
                            %status,
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            "discord send retry"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    let body = rsp.text().await.unwrap_or_default();
                    return Err(anyhow!(
                        "Discord API HTTP {status} for channel {channel_id}: {}",
                        body.chars().take(200).collect::<String>()
                    ));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tracing::debug!(channel_id, attempt, error = %e, "discord request failed; retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("Discord request failed: {e}"));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordMessagePayload {
    embeds: Vec<QuakeEmbed>,
}
