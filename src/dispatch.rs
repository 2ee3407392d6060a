//! # Fan-out Dispatcher
//! Delivers each new quake to every linked channel at once, waits for all
//! attempts to settle, then records the quake as announced.
//!
//! Per-quake commit: if the process dies halfway through a cycle, quakes
//! already fanned out stay tracked and the rest are retried next cycle.
//! Quakes are never tracked while no channel is linked.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use metrics::counter;

use crate::ingest::types::Quake;
use crate::notify::Notifier;
use crate::store::Store;

/// Outcome of one dispatch, rendered for operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchSummary {
    NothingNew,
    NoDestinations { pending: usize },
    Delivered {
        quakes: usize,
        destinations: usize,
        succeeded: usize,
        attempted: usize,
    },
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchSummary::NothingNew => write!(f, "No new earthquakes to report."),
            DispatchSummary::NoDestinations { pending } => write!(
                f,
                "No servers have set an alert channel yet; {pending} new earthquake(s) will be sent once one is linked."
            ),
            DispatchSummary::Delivered {
                quakes,
                destinations,
                succeeded,
                attempted,
            } => write!(
                f,
                "Sent {quakes} new earthquake alert(s) to {destinations} server(s): delivered {succeeded} of {attempted}."
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ok,
    Failed,
    TimedOut,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timeout",
        }
    }
}

pub struct Dispatcher {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    delivery_timeout: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>, delivery_timeout: Duration) -> Self {
        Self {
            store,
            notifier,
            delivery_timeout,
        }
    }

    /// `quakes` must already be in announcement order (oldest first).
    ///
    /// Only a store write failure is returned as an error; delivery failures
    /// are logged and counted.
    pub async fn dispatch(&self, quakes: &[Quake]) -> Result<DispatchSummary> {
        if quakes.is_empty() {
            return Ok(DispatchSummary::NothingNew);
        }

        let destinations = self.store.channels().await;
        if destinations.is_empty() {
            tracing::info!(pending = quakes.len(), "no alert channels linked; holding quakes");
            return Ok(DispatchSummary::NoDestinations {
                pending: quakes.len(),
            });
        }

        let mut succeeded = 0usize;
        let mut attempted = 0usize;

        for quake in quakes {
            let sends = destinations
                .iter()
                .map(|(guild_id, channel_id)| self.deliver(guild_id, channel_id, quake));
            let outcomes = join_all(sends).await;

            attempted += outcomes.len();
            succeeded += outcomes.iter().filter(|o| **o == Outcome::Ok).count();

            // Every destination has been tried once; never announce this quake again.
            self.store.mark_tracked(&quake.id).await?;
            counter!("dispatch_quakes_tracked_total").increment(1);
            tracing::info!(quake_id = %quake.id, "quake tracked");
        }

        Ok(DispatchSummary::Delivered {
            quakes: quakes.len(),
            destinations: destinations.len(),
            succeeded,
            attempted,
        })
    }

    async fn deliver(&self, guild_id: &str, channel_id: &str, quake: &Quake) -> Outcome {
        let res = tokio::time::timeout(self.delivery_timeout, self.notifier.send(channel_id, quake)).await;
        let outcome = match res {
            Ok(Ok(())) => {
                tracing::info!(quake_id = %quake.id, guild_id, channel_id, "alert sent");
                Outcome::Ok
            }
            Ok(Err(e)) => {
                tracing::error!(
                    quake_id = %quake.id,
                    guild_id,
                    channel_id,
                    notifier = self.notifier.name(),
                    error = %e,
                    "alert delivery failed"
                );
                Outcome::Failed
            }
            Err(_) => {
                tracing::error!(
                    quake_id = %quake.id,
                    guild_id,
                    channel_id,
                    timeout_secs = self.delivery_timeout.as_secs(),
                    "alert delivery timed out"
                );
                Outcome::TimedOut
            }
        };
        counter!("dispatch_deliveries_total", "outcome" => outcome.label()).increment(1);
        outcome
    }
}
