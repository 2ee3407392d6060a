use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Router};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Call once.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!(
            "dispatch_deliveries_total",
            "Per-channel alert deliveries by outcome."
        );
        describe_counter!(
            "dispatch_quakes_tracked_total",
            "Quakes recorded as announced."
        );
        describe_counter!("pipeline_runs_total", "Pipeline cycles by trigger.");
        describe_counter!("backup_snapshots_total", "Store backups written.");
        describe_counter!("backup_failures_total", "Scheduled backups that failed.");

        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus text format.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render))
            .with_state(self.handle.clone())
    }
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
