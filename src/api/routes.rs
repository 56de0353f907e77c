//! API route definitions.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/incidents", get(list_incidents))
        .route("/settings", get(settings))
        .route("/settings/cooldowns", put(update_cooldowns))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.monitor.current_status().await;
    Json(json!({ "data": snapshot, "meta": meta() }))
}

async fn list_incidents(State(state): State<AppState>) -> Json<Value> {
    let incidents = state.monitor.incidents().await;
    let total = incidents.len();
    Json(json!({ "data": incidents, "meta": { "total": total } }))
}

async fn settings(State(state): State<AppState>) -> Json<Value> {
    let cooldowns = state.monitor.cooldowns().await;
    Json(json!({ "data": { "cooldowns": cooldowns }, "meta": meta() }))
}

async fn update_cooldowns(
    State(state): State<AppState>,
    Json(intervals): Json<BTreeMap<String, u64>>,
) -> (StatusCode, Json<Value>) {
    match state.monitor.set_cooldowns(&intervals).await {
        Ok(()) => {
            let cooldowns = state.monitor.cooldowns().await;
            (
                StatusCode::OK,
                Json(json!({ "data": { "cooldowns": cooldowns }, "meta": meta() })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "data": null, "meta": { "error": e.to_string() } })),
        ),
    }
}
