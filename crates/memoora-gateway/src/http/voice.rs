use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Form, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, warn};

use memoora_dialog::types::DialogPhase;
use memoora_telephony::twiml::VoiceResponse;

use crate::app::AppState;

/// Voice used for `<Say>` fallbacks when no pre-rendered audio exists.
const SAY_VOICE: &str = "alice";
const DEFAULT_GREETING: &str =
    "Hello! This is Memoora calling to record a story. Please share after the beep.";
const THANKS_AND_GOODBYE: &str = "Thank you so much for sharing your story. Goodbye!";

/// How long the interactive handler waits for an in-flight turn before
/// stalling the provider with a pause-and-redirect. Must stay safely under
/// the provider's synchronous webhook budget.
const TURN_WAIT_POLLS: u32 = 8;
const TURN_WAIT_STEP: Duration = Duration::from_millis(400);

#[derive(Debug, Deserialize)]
pub struct VoiceForm {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    /// Present when this hit is the action callback after a recording.
    #[serde(rename = "RecordingUrl")]
    recording_url: Option<String>,
}

/// POST /voice — prompt webhook for basic calls.
///
/// Never returns 5xx to the provider: any internal failure degrades to the
/// built-in greeting script.
pub async fn voice_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceForm>,
) -> Response {
    let Some(call_sid) = form.call_sid.as_deref() else {
        warn!("voice webhook without CallSid");
        return twiml(fallback_script(&state));
    };

    if let Err(e) = state.registry.mark_in_progress(call_sid) {
        debug!(provider_sid = %call_sid, error = %e, "in-progress mark skipped");
    }

    // Second hit: the recording window closed; wrap up the call.
    if form.recording_url.is_some() {
        return twiml(VoiceResponse::new().say(SAY_VOICE, THANKS_AND_GOODBYE).hangup());
    }

    let prompt = state
        .registry
        .get_by_provider_sid(call_sid)
        .ok()
        .and_then(|record| {
            record
                .metadata
                .get("customMessage")
                .and_then(|v| v.as_str().map(String::from))
                .or(record.question)
        })
        .unwrap_or_else(|| DEFAULT_GREETING.to_string());

    twiml(
        VoiceResponse::new().say(SAY_VOICE, &prompt).record(
            &state.public_url("/voice"),
            &state.public_url("/handle-recording"),
            state.config.limits.max_recording_secs,
        ),
    )
}

/// POST /voice-interactive — per-turn prompt webhook for interactive calls.
///
/// Serves the dialog engine's current snapshot. Heavy work (synthesis,
/// reasoning) never happens here; audio is pre-rendered by the turn
/// pipeline and only referenced from the markup.
pub async fn voice_interactive_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<VoiceForm>,
) -> Response {
    let Some(call_sid) = form.call_sid.as_deref() else {
        warn!("interactive voice webhook without CallSid");
        return twiml(fallback_script(&state));
    };

    if let Err(e) = state.registry.mark_in_progress(call_sid) {
        debug!(provider_sid = %call_sid, error = %e, "in-progress mark skipped");
    }

    let Ok(mut snapshot) = state.dialog.current(call_sid) else {
        warn!(provider_sid = %call_sid, "no dialog state; serving basic script");
        return twiml(fallback_script(&state));
    };

    // A recording callback may still be mid-pipeline. Give it a moment:
    // the turn ordering guarantee means the next prompt must reflect the
    // answer that was just recorded.
    let mut polls = 0;
    while snapshot.phase == DialogPhase::AwaitingTurn && polls < TURN_WAIT_POLLS {
        tokio::time::sleep(TURN_WAIT_STEP).await;
        polls += 1;
        match state.dialog.current(call_sid) {
            Ok(s) => snapshot = s,
            Err(_) => return twiml(fallback_script(&state)),
        }
    }

    let response = match &snapshot.phase {
        DialogPhase::AwaitingTurn => {
            // Still processing; stall politely and come back.
            debug!(provider_sid = %call_sid, "turn still in flight; stalling");
            VoiceResponse::new()
                .pause(2)
                .redirect(&state.public_url("/voice-interactive"))
        }
        DialogPhase::Closing(text) => VoiceResponse::new().say(SAY_VOICE, text).hangup(),
        DialogPhase::Retrying(feedback) => VoiceResponse::new()
            .say(SAY_VOICE, feedback)
            .say(SAY_VOICE, &snapshot.rendered_prompt)
            .record(
                &state.public_url("/voice-interactive"),
                &state.public_url("/handle-recording"),
                state.config.limits.max_recording_secs,
            ),
        DialogPhase::Asking => {
            let base = match state.prompt_audio.get(call_sid) {
                Some(filename) => VoiceResponse::new()
                    .play(&state.public_url(&format!("/audio/{}", filename.value()))),
                None => VoiceResponse::new().say(SAY_VOICE, &snapshot.rendered_prompt),
            };
            base.record(
                &state.public_url("/voice-interactive"),
                &state.public_url("/handle-recording"),
                state.config.limits.max_recording_secs,
            )
        }
    };

    twiml(response)
}

/// Built-in script used whenever the record or dialog state is missing.
fn fallback_script(state: &AppState) -> VoiceResponse {
    VoiceResponse::new().say(SAY_VOICE, DEFAULT_GREETING).record(
        &state.public_url("/voice"),
        &state.public_url("/handle-recording"),
        state.config.limits.max_recording_secs,
    )
}

/// Render markup into an XML response; a render failure degrades to an
/// empty `<Response/>` rather than a 5xx the provider would replay.
fn twiml(response: VoiceResponse) -> Response {
    let body = response.to_xml().unwrap_or_else(|e| {
        warn!(error = %e, "markup render failed; sending empty response");
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><Response />".to_string()
    });
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}
