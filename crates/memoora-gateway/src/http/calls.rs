use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use memoora_core::types::{CallKind, PhoneNumber};
use memoora_credentials::types::Permission;
use memoora_registry::types::{CallFilter, CallStatus, NewCall};
use memoora_telephony::types::WebhookUrls;

use crate::app::AppState;
use crate::auth::authenticate;
use crate::http::error::ApiError;
use crate::pipeline::turn::prerender_prompt;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    phone_number: Option<String>,
    custom_message: Option<String>,
    question: Option<String>,
    call_type: Option<String>,
    interactive: Option<bool>,
    storyteller_id: Option<String>,
    family_member_id: Option<String>,
    scheduled_call_id: Option<String>,
}

/// POST /call — validate the key, create the registry record, place the
/// call, and kick off prompt pre-rendering for interactive calls.
pub async fn place_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CallRequest>,
) -> Result<Json<Value>, ApiError> {
    let auth = authenticate(&state, &headers, Permission::Call)?;

    let raw_number = req
        .phone_number
        .as_deref()
        .ok_or_else(|| ApiError::missing_fields(vec!["phoneNumber"]))?;
    let to = PhoneNumber::parse(raw_number)
        .ok_or_else(|| ApiError::invalid_input("phoneNumber must be E.164, e.g. +13128484329"))?;

    let kind = resolve_kind(req.call_type.as_deref(), req.interactive)?;

    // Backpressure: reject placements rather than queueing unboundedly.
    if state.turn_permits.available_permits() == 0 {
        warn!("turn pool saturated; rejecting placement");
        return Err(ApiError::resource_exhausted());
    }

    let mut metadata = Map::new();
    if let Some(v) = &req.storyteller_id {
        metadata.insert("storytellerId".into(), Value::String(v.clone()));
    }
    if let Some(v) = &req.family_member_id {
        metadata.insert("familyMemberId".into(), Value::String(v.clone()));
    }
    if let Some(v) = &req.scheduled_call_id {
        metadata.insert("scheduledCallId".into(), Value::String(v.clone()));
    }
    if let Some(v) = &req.custom_message {
        metadata.insert("customMessage".into(), Value::String(v.clone()));
    }

    let identity = state.telephony.caller_identity()?;
    let record = state.registry.create(NewCall {
        key_id: auth.key_id.clone(),
        account_id: auth.account_id.clone(),
        to: to.as_str().to_string(),
        caller: identity.preferred().to_string(),
        kind,
        question: req.question.clone(),
        metadata,
    })?;

    let voice_path = match kind {
        CallKind::Basic => "/voice",
        CallKind::Interactive => "/voice-interactive",
    };
    let webhooks = WebhookUrls {
        voice_url: state.public_url(voice_path),
        status_callback: state.public_url("/call-status"),
    };

    let placement = match state.telephony.place(to.as_str(), webhooks, None).await {
        Ok(p) => p,
        Err(e) => {
            warn!(call_id = %record.id, error = %e, "placement failed");
            if let Err(mark_err) = state.registry.fail_unplaced(&record.id, &e.to_string()) {
                warn!(call_id = %record.id, error = %mark_err, "could not mark call failed");
            }
            return Err(e.into());
        }
    };

    let mut placement_meta = Map::new();
    placement_meta.insert("fallbackUsed".into(), Value::Bool(placement.fallback_used));
    if let Some(reason) = &placement.fallback_reason {
        placement_meta.insert("fallbackReason".into(), Value::String(reason.clone()));
    }
    state.registry.record_placement(
        &record.id,
        &placement.provider_sid,
        &placement.from_used,
        placement_meta,
    )?;

    state.credentials.increment_usage(&auth.key_id)?;

    if kind == CallKind::Interactive {
        state.dialog.begin(&placement.provider_sid);
        let snapshot = state.dialog.current(&placement.provider_sid)?;
        // Pre-render the first prompt off the request path so the prompt
        // webhook can play cached audio within its synchronous budget.
        tokio::spawn(prerender_prompt(
            state.clone(),
            placement.provider_sid.clone(),
            snapshot.rendered_prompt,
        ));
    }

    let record = state.registry.get_by_internal_id(&record.id)?;
    info!(
        call_id = %record.id,
        provider_sid = %placement.provider_sid,
        kind = %kind,
        "call placed"
    );

    Ok(Json(json!({
        "success": true,
        "callId": record.id,
        "twilioSid": placement.provider_sid,
        "status": record.status,
        "to": record.to,
        "metadata": record.metadata,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    limit: Option<u32>,
}

/// GET /calls — records owned by the presented key, newest first.
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let auth = authenticate(&state, &headers, Permission::Read)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<CallStatus>()
                .map_err(|_| ApiError::invalid_input(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let calls = state.registry.list_by_credential(
        &auth.key_id,
        &CallFilter {
            status,
            limit: query.limit,
        },
    )?;

    Ok(Json(json!({ "calls": calls, "count": calls.len() })))
}

#[derive(Debug, Deserialize)]
pub struct GetCallQuery {
    /// When true and the call is still in flight, re-sync the status from
    /// the provider before answering.
    refresh: Option<bool>,
}

/// GET /calls/:id — a single record, if owned by the presented key.
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<GetCallQuery>,
) -> Result<Json<Value>, ApiError> {
    let auth = authenticate(&state, &headers, Permission::Read)?;
    let mut record = state.registry.get_by_internal_id(&id)?;
    if record.key_id != auth.key_id {
        // Records belonging to other credentials are indistinguishable
        // from absent ones.
        return Err(ApiError::not_found(format!("call {id} not found")));
    }

    if query.refresh == Some(true) && !record.status.is_terminal() {
        if let Some(sid) = record.provider_sid.clone() {
            match state.telephony.fetch_status(&sid).await {
                Ok(snapshot) => {
                    if let Some(status) = CallStatus::from_provider(&snapshot.status) {
                        let _ = state.registry.update_status(
                            &sid,
                            status,
                            None,
                            snapshot.duration_secs,
                            Map::new(),
                        );
                        record = state.registry.get_by_internal_id(&id)?;
                    }
                }
                Err(e) => warn!(call_id = %id, error = %e, "status refresh failed"),
            }
        }
    }

    Ok(Json(json!({ "call": record })))
}

/// POST /calls/:id/cancel — explicit client cancel. Legal only from
/// non-terminal states; the provider is asked to hang up and all per-call
/// state (including any in-flight turn task) is discarded.
pub async fn cancel_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let auth = authenticate(&state, &headers, Permission::Call)?;
    let record = state.registry.get_by_internal_id(&id)?;
    if record.key_id != auth.key_id {
        return Err(ApiError::not_found(format!("call {id} not found")));
    }

    let record = state.registry.cancel(&id)?;
    let mut provider_hangup_confirmed = false;
    if let Some(sid) = &record.provider_sid {
        // The record is already canceled either way; the provider-side
        // hangup is best effort, and the caller is told which it was so a
        // still-ringing call isn't mistaken for a confirmed hangup.
        match state.telephony.end_call(sid).await {
            Ok(()) => provider_hangup_confirmed = true,
            Err(e) => warn!(call_id = %id, error = %e, "provider hangup failed"),
        }
        state.forget_call(sid);
    }
    info!(call_id = %id, provider_hangup_confirmed, "call canceled by client");
    Ok(Json(json!({
        "success": true,
        "providerHangupConfirmed": provider_hangup_confirmed,
        "call": record,
    })))
}

fn resolve_kind(call_type: Option<&str>, interactive: Option<bool>) -> Result<CallKind, ApiError> {
    if let Some(raw) = call_type {
        return CallKind::parse(raw)
            .ok_or_else(|| ApiError::invalid_input(format!("unknown callType '{raw}'")));
    }
    Ok(match interactive {
        Some(true) => CallKind::Interactive,
        _ => CallKind::Basic,
    })
}
