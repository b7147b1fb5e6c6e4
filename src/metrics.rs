// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "capture_attempts_total",
            "Target responses that passed the fingerprint gate."
        );
        describe_counter!(
            "capture_parse_errors_total",
            "Target responses whose body was not valid JSON."
        );
        describe_counter!(
            "gate_rejections_total",
            "Captures rejected as in progress or recently processed."
        );
        describe_counter!(
            "delivery_attempts_total",
            "POST attempts against the collector."
        );
        describe_counter!(
            "delivery_failures_total",
            "Deliveries that failed after all retries."
        );
        describe_counter!(
            "delivery_items_total",
            "Normalized records accepted by the collector."
        );
        describe_counter!(
            "bridge_foreign_messages_total",
            "Channel messages dropped for a missing or foreign source tag."
        );
        describe_counter!("scheduler_cycles_total", "Capture cycles run by the scheduler.");
        describe_gauge!(
            "scheduler_last_run_ts",
            "Unix time of the last finished capture cycle."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Repeated calls share the first recorder.
    pub fn init() -> Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")
            })?
            .clone();
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
