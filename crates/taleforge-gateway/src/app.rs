use std::sync::atomic::AtomicU64;

use axum::{routing::get, Router};
use taleforge_core::TaleforgeConfig;

pub const DM_SYSTEM_PROMPT: &str = include_str!("prompts/dm_system.md");

/// Shared process state. Deliberately thin — per-session state (orchestrator,
/// pipeline, audio mode, roll handshake) lives in the WS connection task, not
/// here, since sessions must not share mutable state.
pub struct AppState {
    pub config: TaleforgeConfig,
    pub active_sessions: AtomicU64,
}

impl AppState {
    pub fn new(config: TaleforgeConfig) -> Self {
        Self {
            config,
            active_sessions: AtomicU64::new(0),
        }
    }
}

pub fn build_router(state: std::sync::Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws/{campaign_id}", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
