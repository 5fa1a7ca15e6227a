use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use memoora_credentials::types::Permission;

use crate::app::AppState;
use crate::auth::authenticate;
use crate::http::error::ApiError;

/// GET /stats — usage windows and call aggregates for the presented key.
/// The credential store is the only source for counters; nothing else in
/// the service keeps its own.
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let auth = authenticate(&state, &headers, Permission::Read)?;

    let usage = state.credentials.usage_snapshot(&auth.key_id)?;
    let counts = state.registry.counts_for_credential(&auth.key_id)?;

    Ok(Json(json!({
        "keyId": auth.key_id,
        "usage": {
            "hour": { "used": usage.hour, "limit": usage.limits.per_hour },
            "day": { "used": usage.day, "limit": usage.limits.per_day },
            "month": { "used": usage.month, "limit": usage.limits.per_month },
        },
        "calls": counts,
        "liveConversations": state.dialog.live_conversations(),
    })))
}
