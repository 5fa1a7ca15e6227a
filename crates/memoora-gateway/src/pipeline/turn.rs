use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use memoora_core::types::CallKind;
use memoora_ai::AnalysisRequest;
use memoora_dialog::types::{NextAction, TurnAnalysis};
use memoora_notify::NotificationEvent;
use memoora_registry::types::{CallRecord, RecordingRef};

use crate::app::AppState;
use crate::pipeline::fetch::{fetch_recording, StoredRecording};

/// Parsed /handle-recording callback.
#[derive(Debug, Clone)]
pub struct RecordingCallback {
    pub call_sid: String,
    pub recording_sid: String,
    pub recording_url: String,
    pub duration_secs: Option<u32>,
}

const CLARIFICATION_PROMPT: &str =
    "I'm sorry, I had trouble hearing you. Could you say that once more?";
/// Consecutive degraded turns before the call is closed politely.
const MAX_DEGRADED_TURNS: u32 = 2;

/// The per-turn asynchronous pipeline: download, transcribe, reason,
/// record the answer, decide the next turn, and (on close) notify.
///
/// Failures degrade instead of crashing the call: a recognition failure
/// retries the turn once with a clarification, a reasoning failure falls
/// back to the static pointer, and repeated failure closes politely while
/// still delivering a notification if a recording exists.
pub async fn process_recording(state: Arc<AppState>, cb: RecordingCallback) {
    let cancel = CancellationToken::new();
    state
        .active_turns
        .insert(cb.call_sid.clone(), cancel.clone());

    let result = run_turn(&state, &cb, &cancel).await;
    if let Err(e) = result {
        warn!(provider_sid = %cb.call_sid, error = %e, "turn pipeline aborted");
    }

    state.active_turns.remove(&cb.call_sid);
}

async fn run_turn(
    state: &Arc<AppState>,
    cb: &RecordingCallback,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let record = state
        .registry
        .get_by_provider_sid(&cb.call_sid)
        .map_err(|e| format!("no call record: {e}"))?;

    // Step 1: pull the media down. A failed fetch leaves the call
    // completed but unrecorded; for interactive calls the dialog closes.
    let stored = match fetch_recording(state, &cb.recording_url, cb.duration_secs).await {
        Ok(s) => s,
        Err(e) => {
            error!(provider_sid = %cb.call_sid, error = %e, "recording fetch failed");
            if record.kind == CallKind::Interactive {
                let _ = state.dialog.force_close(&cb.call_sid);
            }
            return Ok(());
        }
    };

    // First recording wins; later turns keep the original reference.
    match state.registry.attach_recording(
        &cb.call_sid,
        RecordingRef {
            filename: stored.filename.clone(),
            size_bytes: stored.size_bytes,
            duration_secs: stored.duration_secs,
        },
    ) {
        Ok(()) => {}
        Err(memoora_registry::RegistryError::RecordingAlreadySet(_)) => {
            debug!(provider_sid = %cb.call_sid, "recording reference already set; keeping first");
        }
        Err(e) => warn!(provider_sid = %cb.call_sid, error = %e, "could not attach recording"),
    }

    if record.kind == CallKind::Basic {
        // Basic calls have no dialog; the single recording completes them.
        let record = state
            .registry
            .get_by_provider_sid(&cb.call_sid)
            .map_err(|e| e.to_string())?;
        enqueue_notification(state, &record);
        return Ok(());
    }

    if cancel.is_cancelled() {
        return Err("cancelled before transcription".into());
    }

    interactive_turn(state, cb, &stored).await
}

async fn interactive_turn(
    state: &Arc<AppState>,
    cb: &RecordingCallback,
    stored: &StoredRecording,
) -> Result<(), String> {
    let snapshot = match state.dialog.current(&cb.call_sid) {
        Ok(s) => s,
        Err(e) => {
            // Conversation already discarded (hangup raced the callback).
            debug!(provider_sid = %cb.call_sid, error = %e, "no dialog state for turn");
            return Ok(());
        }
    };

    // Step 2: transcription.
    let transcript = match transcribe(state, stored).await {
        Some(text) => text,
        None => {
            return degrade_turn(state, cb).await;
        }
    };

    // Step 3: reasoning. Unavailable or failing reasoning falls back to
    // the static pointer; the turn still completes.
    let analysis = analyze(state, cb, &snapshot.question_id, &snapshot.rendered_prompt, &transcript)
        .await
        .unwrap_or_else(TurnAnalysis::static_fallback);

    // Steps 4-5: commit the answer, then decide.
    let normalized = transcript.trim().to_string();
    state
        .dialog
        .record_answer(&cb.call_sid, &snapshot.question_id, &transcript, &normalized)
        .map_err(|e| e.to_string())?;
    let action = state
        .dialog
        .decide(&cb.call_sid, &analysis)
        .map_err(|e| e.to_string())?;

    state.turn_failures.remove(&cb.call_sid);

    // Step 6: act on the decision.
    match action {
        NextAction::ContinueWith(question) => {
            let rendered = {
                let snapshot = state
                    .dialog
                    .current(&cb.call_sid)
                    .map_err(|e| e.to_string())?;
                snapshot.rendered_prompt
            };
            debug!(provider_sid = %cb.call_sid, next = %question.id, "continuing conversation");
            prerender_prompt(state.clone(), cb.call_sid.clone(), rendered).await;
        }
        NextAction::Retry(_) => {
            // The prompt handler re-asks with the feedback text; stale
            // cached audio for the old prompt must not play instead.
            state.prompt_audio.remove(&cb.call_sid);
        }
        NextAction::Close(_) => {
            let record = state
                .registry
                .get_by_provider_sid(&cb.call_sid)
                .map_err(|e| e.to_string())?;
            enqueue_notification(state, &record);
        }
    }
    Ok(())
}

/// Recognition failed. The first miss re-asks with a clarification; the
/// second closes the call politely, still notifying if a recording exists.
async fn degrade_turn(state: &Arc<AppState>, cb: &RecordingCallback) -> Result<(), String> {
    let failures = {
        let mut entry = state.turn_failures.entry(cb.call_sid.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    if failures < MAX_DEGRADED_TURNS {
        warn!(provider_sid = %cb.call_sid, failures, "turn degraded; asking for clarification");
        state
            .dialog
            .request_retry(&cb.call_sid, CLARIFICATION_PROMPT)
            .map_err(|e| e.to_string())?;
        state.prompt_audio.remove(&cb.call_sid);
        return Ok(());
    }

    warn!(provider_sid = %cb.call_sid, failures, "repeated turn failures; closing call");
    if state.dialog.force_close(&cb.call_sid).is_err() {
        // No dialog state left; the next prompt hit serves the fallback
        // script, which ends the call on its own.
        debug!(provider_sid = %cb.call_sid, "dialog already gone");
    }
    if let Ok(record) = state.registry.get_by_provider_sid(&cb.call_sid) {
        if record.recording.is_some() {
            enqueue_notification(state, &record);
        }
    }
    Ok(())
}

async fn transcribe(state: &Arc<AppState>, stored: &StoredRecording) -> Option<String> {
    let recognition = state.recognition.as_ref().filter(|r| r.available())?;
    let audio = match tokio::fs::read(&stored.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(path = %stored.path.display(), error = %e, "could not read stored recording");
            return None;
        }
    };
    match recognition.transcribe(&audio, &stored.filename).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => {
            warn!("empty transcript");
            None
        }
        Err(e) => {
            warn!(error = %e, "transcription failed");
            None
        }
    }
}

async fn analyze(
    state: &Arc<AppState>,
    cb: &RecordingCallback,
    question_id: &str,
    question_prompt: &str,
    transcript: &str,
) -> Option<TurnAnalysis> {
    let reasoning = state.reasoning.as_ref().filter(|r| r.available())?;

    let answered: Vec<String> = state
        .dialog
        .summary(&cb.call_sid)
        .ok()?
        .into_iter()
        .map(|a| a.question_id)
        .collect();
    let allowed_next: Vec<String> = state
        .dialog
        .flow()
        .question_ids()
        .filter(|id| !answered.iter().any(|a| a == id) && *id != question_id)
        .map(String::from)
        .collect();
    let context_summary = state.dialog.context_summary(&cb.call_sid).ok()?;

    let request = AnalysisRequest {
        question_id: question_id.to_string(),
        question_prompt: question_prompt.to_string(),
        transcript: transcript.to_string(),
        context_summary,
        allowed_next,
    };
    match reasoning.analyze(&request).await {
        Ok(analysis) => Some(analysis),
        Err(e) => {
            warn!(provider_sid = %cb.call_sid, error = %e, "reasoning failed; static fallback");
            None
        }
    }
}

/// Synthesize prompt audio into the temp dir and register it for the
/// prompt handler. Failures just mean the handler falls back to `<Say>`.
pub async fn prerender_prompt(state: Arc<AppState>, provider_sid: String, text: String) {
    let Some(synthesis) = state.synthesis.as_ref().filter(|s| s.available()) else {
        return;
    };

    let audio = match synthesis.synthesize(&text).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(provider_sid = %provider_sid, error = %e, "prompt synthesis failed");
            return;
        }
    };

    let temp_dir = std::path::Path::new(&state.config.storage.temp_dir);
    if let Err(e) = tokio::fs::create_dir_all(temp_dir).await {
        warn!(error = %e, "could not create temp audio dir");
        return;
    }
    let filename = format!("question_{}_{}.mp3", provider_sid, state.clock.unix_millis());
    if let Err(e) = tokio::fs::write(temp_dir.join(&filename), &audio).await {
        warn!(error = %e, "could not write prompt audio");
        return;
    }

    debug!(provider_sid = %provider_sid, filename = %filename, "prompt audio cached");
    state.prompt_audio.insert(provider_sid, filename);
}

/// Build and queue the completion event, exactly once per call across the
/// close decision and the terminal status callback.
pub fn enqueue_notification(state: &Arc<AppState>, record: &CallRecord) {
    let Some(provider_sid) = record.provider_sid.as_deref() else {
        return;
    };
    let Some(recording) = &record.recording else {
        warn!(provider_sid, "completed call has no recording; nothing to notify");
        return;
    };
    if state
        .notify_enqueued
        .insert(provider_sid.to_string(), ())
        .is_some()
    {
        return;
    }

    let metadata_str = |key: &str| {
        record
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    let event = NotificationEvent {
        call_sid: provider_sid.to_string(),
        filename: recording.filename.clone(),
        duration_seconds: recording.duration_secs.or(record.duration_secs),
        file_size: recording.size_bytes,
        storyteller_id: metadata_str("storytellerId"),
        family_member_id: metadata_str("familyMemberId"),
        question: record.question.clone(),
    };
    info!(provider_sid, filename = %event.filename, "completion notification queued");
    state.notifier.enqueue(event);
}
