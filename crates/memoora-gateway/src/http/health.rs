use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness probe with AI capability availability.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let capability = |available: Option<bool>| match available {
        Some(true) => "available",
        Some(false) => "unavailable",
        None => "not-configured",
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": {
            "synthesis": capability(state.synthesis.as_ref().map(|c| c.available())),
            "recognition": capability(state.recognition.as_ref().map(|c| c.available())),
            "reasoning": capability(state.reasoning.as_ref().map(|c| c.available())),
        },
        "liveConversations": state.dialog.live_conversations(),
        "turnPermitsAvailable": state.turn_permits.available_permits(),
    }))
}
