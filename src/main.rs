//! News capture service: binary entrypoint.
//! Wires the capture pipeline, restores the scheduler and serves the control API.

use std::sync::Arc;

use news_interceptor::api::{self, AppState};
use news_interceptor::config;
use news_interceptor::metrics::Metrics;
use news_interceptor::pipeline::CapturePipeline;
use news_interceptor::state::JsonFileStore;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON lines when `CAPTURE_LOG_JSON=1`.
fn init_tracing() {
    let json = std::env::var("CAPTURE_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // the runtime may already own the global subscriber
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default()?;
    let metrics = Metrics::init()?;

    let store = Arc::new(JsonFileStore::new(cfg.state_path.clone()));
    let mut pipeline = CapturePipeline::build(&cfg, store)?;
    pipeline.spawn();

    // restoring fires a cycle; keep it off the startup path
    let scheduler = pipeline.scheduler.clone();
    tokio::spawn(async move {
        match scheduler.restore().await {
            Ok(true) => tracing::info!(target: "scheduler", "scheduler restored"),
            Ok(false) => {}
            Err(e) => tracing::warn!(target: "scheduler", error = %e, "scheduler restore failed"),
        }
    });

    let router = api::router(AppState {
        controller: Arc::clone(&pipeline.controller),
    })
    .merge(metrics.router());

    Ok(router.into())
}
