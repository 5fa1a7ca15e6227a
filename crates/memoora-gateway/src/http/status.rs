use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Map;
use tracing::{debug, warn};

use memoora_core::types::CallKind;
use memoora_registry::types::CallStatus;

use crate::app::AppState;
use crate::pipeline::turn::enqueue_notification;

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    call_status: Option<String>,
    #[serde(rename = "CallDuration")]
    call_duration: Option<String>,
    /// RFC 2822 event timestamp the provider stamps on each callback.
    #[serde(rename = "Timestamp")]
    timestamp: Option<String>,
}

/// POST /call-status — provider lifecycle callbacks.
///
/// Always acknowledges with 2xx: a non-2xx would make the provider replay
/// the callback destructively. Internal failures are logged only.
pub async fn call_status_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<StatusForm>,
) -> (StatusCode, &'static str) {
    let (Some(call_sid), Some(raw_status)) = (form.call_sid.as_deref(), form.call_status.as_deref())
    else {
        warn!("status callback missing CallSid or CallStatus");
        return (StatusCode::OK, "OK");
    };

    let Some(status) = CallStatus::from_provider(raw_status) else {
        warn!(provider_sid = %call_sid, raw_status, "unrecognised provider status");
        return (StatusCode::OK, "OK");
    };

    let provider_ts: Option<DateTime<Utc>> = form
        .timestamp
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
        .map(|t| t.with_timezone(&Utc));
    let duration_secs = form.call_duration.as_deref().and_then(|d| d.parse().ok());

    match state
        .registry
        .update_status(call_sid, status, provider_ts, duration_secs, Map::new())
    {
        Ok(outcome) => {
            debug!(provider_sid = %call_sid, status = %status, ?outcome, "status callback applied")
        }
        Err(e) => warn!(provider_sid = %call_sid, error = %e, "status callback failed"),
    }

    if status.is_terminal() {
        finish_call(&state, call_sid, status).await;
    }

    (StatusCode::OK, "OK")
}

/// End-of-call bookkeeping. A completed interactive call whose dialog never
/// reached a closing decision (callee hung up) still gets its notification
/// if a recording exists.
async fn finish_call(state: &Arc<AppState>, call_sid: &str, status: CallStatus) {
    if status == CallStatus::Completed {
        if let Ok(record) = state.registry.get_by_provider_sid(call_sid) {
            if record.kind == CallKind::Interactive && record.recording.is_some() {
                enqueue_notification(state, &record);
            }
        }
    }
    state.forget_call(call_sid);
}
