//! Local collector: receives normalized news records on `/api/capture`.
//!
//! `COLLECTOR_PORT` (default 1123), `COLLECTOR_DATA_FILE`, `COLLECTOR_SERVICE`.

use std::sync::Arc;

use anyhow::Context;
use news_interceptor::collector::{self, CollectorState, NewsFile};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let port = std::env::var("COLLECTOR_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(collector::DEFAULT_PORT);
    let data = std::env::var("COLLECTOR_DATA_FILE")
        .unwrap_or_else(|_| collector::DEFAULT_DATA_FILE.to_string());
    let service =
        std::env::var("COLLECTOR_SERVICE").unwrap_or_else(|_| "news collector".to_string());

    let state = CollectorState {
        service,
        port,
        file: Arc::new(NewsFile::new(data)),
    };
    let app = collector::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding collector port {port}"))?;
    tracing::info!(target: "collector", port, "collector listening");
    axum::serve(listener, app).await?;
    Ok(())
}
