// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pipeline::Pipeline;

pub const ERROR_SUMMARY: &str = "Error occurred while sending earthquake alerts.";

/// Runs pipeline cycles on a timer and on demand, never two at once.
#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    in_flight: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run a cycle now. Waits for any running cycle to finish first, then
    /// runs its own so the caller sees an up-to-date result.
    pub async fn trigger_now(&self) -> String {
        let _guard = self.in_flight.lock().await;
        self.run_locked("manual").await
    }

    /// Timer path: skips when a cycle is already running.
    pub async fn tick(&self) -> Option<String> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!(target: "scheduler", "cycle in flight; skipping tick");
            return None;
        };
        Some(self.run_locked("timer").await)
    }

    async fn run_locked(&self, trigger: &'static str) -> String {
        counter!("pipeline_runs_total", "trigger" => trigger).increment(1);
        match self.pipeline.run_cycle().await {
            Ok(summary) => {
                tracing::info!(target: "scheduler", trigger, summary = %summary, "cycle finished");
                summary.to_string()
            }
            Err(e) => {
                tracing::error!(target: "scheduler", trigger, error = ?e, "cycle failed");
                ERROR_SUMMARY.to_string()
            }
        }
    }

    /// Spawn the polling loop. The first tick fires immediately. Once
    /// `shutdown` flips to `true` no new cycle starts; a running one finishes.
    pub fn spawn(&self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(target: "scheduler", every_secs = every.as_secs(), "polling started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.tick().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(target: "scheduler", "polling stopped");
        })
    }
}
