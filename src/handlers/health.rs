use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::AppState;

/// Liveness check. Never touches the document store.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
