// src/collector.rs
//! Local collector service: accepts normalized records and keeps them in a
//! JSON file, de-duplicated by publish time + title.

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::state::set_aside_corrupt;

pub const DEFAULT_PORT: u16 = 1123;
pub const DEFAULT_DATA_FILE: &str = "data/news_data.json";

const TIME_KEYS: [&str; 2] = ["publishedAt", "published_time"];
const TITLE_KEYS: [&str; 2] = ["headline", "title"];

/// Records already on file, append-only.
pub struct NewsFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NewsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Vec<Value>> {
        let _g = self.lock.lock().await;
        self.read().await
    }

    /// Append records not seen before; stamps `localReceivedTime`.
    /// Returns `(added, total)`.
    pub async fn append(&self, items: &[Value]) -> Result<(usize, usize)> {
        let _g = self.lock.lock().await;
        let mut all = self.read().await?;
        let mut seen: HashSet<String> = all.iter().map(dedup_key).collect();
        let received = Utc::now().to_rfc3339();

        let mut added = 0;
        for it in items {
            let Some(obj) = it.as_object() else {
                continue;
            };
            let key = dedup_key(it);
            if !seen.insert(key) {
                continue;
            }
            let mut rec: Map<String, Value> = obj.clone();
            rec.insert("localReceivedTime".into(), Value::String(received.clone()));
            all.push(Value::Object(rec));
            added += 1;
        }

        if added > 0 {
            self.write(&all).await?;
        }
        Ok((added, all.len()))
    }

    async fn read(&self) -> Result<Vec<Value>> {
        match fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(Vec::new()),
            Ok(s) => match serde_json::from_str(&s) {
                Ok(v) => Ok(v),
                Err(e) => {
                    let aside = set_aside_corrupt(&self.path).await?;
                    tracing::warn!(
                        target: "collector",
                        path = %self.path.display(),
                        moved_to = %aside.display(),
                        "corrupt news file, starting fresh: {e}"
                    );
                    Ok(Vec::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    async fn write(&self, all: &[Value]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(all)?;
        fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

fn first_str<'a>(v: &'a Value, keys: &[&str]) -> &'a str {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
}

fn dedup_key(v: &Value) -> String {
    format!("{}\u{1f}{}", first_str(v, &TIME_KEYS), first_str(v, &TITLE_KEYS))
}

#[derive(Clone)]
pub struct CollectorState {
    pub service: String,
    pub port: u16,
    pub file: Arc<NewsFile>,
}

pub fn router(state: CollectorState) -> Router {
    Router::new()
        .route("/api/capture", post(capture))
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn capture(
    State(state): State<CollectorState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let body = body.ok();
    let items = body
        .as_ref()
        .and_then(|Json(v)| v.get("capturedData"))
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty());
    let Some(items) = items else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "capturedData is missing or empty" })),
        );
    };

    match state.file.append(items).await {
        Ok((added, total)) => {
            tracing::info!(target: "collector", added, total, "records received");
            (
                StatusCode::OK,
                Json(json!({ "success": true, "message": "saved", "added": added, "total": total })),
            )
        }
        Err(e) => {
            tracing::error!(target: "collector", "saving records failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": format!("save failed: {e}") })),
            )
        }
    }
}

async fn health(State(state): State<CollectorState>) -> Json<Value> {
    let pending = state.file.load().await.map(|v| v.len()).unwrap_or(0);
    Json(json!({
        "status": "ok",
        "service": state.service,
        "port": state.port,
        "time": Utc::now().to_rfc3339(),
        "pending_news": pending,
    }))
}

async fn stats(State(state): State<CollectorState>) -> Json<Value> {
    let total = state.file.load().await.map(|v| v.len()).unwrap_or(0);
    Json(json!({
        "total": total,
        "file": state.file.path().display().to_string(),
    }))
}
