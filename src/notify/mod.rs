pub mod discord;
pub mod embed;
pub mod map;

use anyhow::Result;

use crate::ingest::types::Quake;

/// Delivers one alert to one channel.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel_id: &str, quake: &Quake) -> Result<()>;
    fn name(&self) -> &'static str;
}
