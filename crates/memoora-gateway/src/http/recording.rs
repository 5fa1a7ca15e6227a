use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::app::AppState;
use crate::pipeline::turn::{process_recording, RecordingCallback};

#[derive(Debug, Deserialize)]
pub struct RecordingForm {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    #[serde(rename = "RecordingSid")]
    recording_sid: Option<String>,
    #[serde(rename = "RecordingUrl")]
    recording_url: Option<String>,
    #[serde(rename = "RecordingDuration")]
    recording_duration: Option<String>,
}

/// POST /handle-recording — the provider's recording-ready callback.
///
/// Acknowledges immediately; the entire turn pipeline (download,
/// transcription, reasoning, notification) runs asynchronously behind the
/// worker-pool semaphore. Saturation degrades by skipping the turn, never
/// by failing the webhook.
pub async fn handle_recording(
    State(state): State<Arc<AppState>>,
    Form(form): Form<RecordingForm>,
) -> (StatusCode, &'static str) {
    let (Some(call_sid), Some(recording_sid), Some(recording_url)) = (
        form.call_sid.clone(),
        form.recording_sid.clone(),
        form.recording_url.clone(),
    ) else {
        warn!("recording callback with missing fields");
        return (StatusCode::OK, "OK");
    };

    let duration_secs = form
        .recording_duration
        .as_deref()
        .and_then(|d| d.parse().ok());

    let Ok(permit) = state.turn_permits.clone().try_acquire_owned() else {
        warn!(provider_sid = %call_sid, "turn pool saturated; recording left unprocessed");
        return (StatusCode::OK, "OK");
    };

    // Hold the prompt handler in AwaitingTurn until the decision lands.
    // Basic calls have no conversation state; the pipeline still fetches
    // and notifies for them.
    let _ = state.dialog.mark_awaiting_turn(&call_sid);

    info!(provider_sid = %call_sid, recording_sid = %recording_sid, "recording callback accepted");

    let callback = RecordingCallback {
        call_sid,
        recording_sid,
        recording_url,
        duration_secs,
    };
    tokio::spawn(async move {
        process_recording(state, callback).await;
        drop(permit);
    });

    (StatusCode::OK, "OK")
}
