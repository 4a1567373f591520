use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness probe.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_sessions": state.active_sessions.load(Ordering::Relaxed),
        "model_configured": state.config.model.api_key.is_some(),
    }))
}
