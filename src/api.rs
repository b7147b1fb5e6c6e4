use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::controller::{ControlRequest, ControlResponse, Controller};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/control", post(control))
        .route("/scheduler/status", get(scheduler_status))
        .route("/records", get(records))
        .route("/last-capture", get(last_capture))
        .route("/badge", get(badge))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn control(
    State(state): State<AppState>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> (StatusCode, Json<ControlResponse>) {
    let Json(req) = match body {
        Ok(b) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ControlResponse {
                    success: false,
                    status: None,
                    error: Some(format!("unknown or malformed message: {}", e.body_text())),
                }),
            )
        }
    };
    let rsp = state.controller.handle(req).await;
    let code = if rsp.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (code, Json(rsp))
}

async fn scheduler_status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.controller.scheduler().status().await {
        Ok(st) => (StatusCode::OK, Json(json!(st))),
        Err(e) => internal(e),
    }
}

async fn records(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.controller.records().await {
        Ok(r) => (StatusCode::OK, Json(json!(r))),
        Err(e) => internal(e),
    }
}

async fn last_capture(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.controller.last_capture().await {
        Ok(c) => (StatusCode::OK, Json(json!(c))),
        Err(e) => internal(e),
    }
}

async fn badge(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.controller.badge()))
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    tracing::error!(target: "controller", "request failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
}
