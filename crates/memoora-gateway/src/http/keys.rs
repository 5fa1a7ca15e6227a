use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::http::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateKeyRequest {
    client_name: Option<String>,
    email: Option<String>,
    company_website: Option<String>,
    phone_number: Option<String>,
    description: Option<String>,
}

/// POST /generate-api-key — the only client endpoint that needs no key.
/// The plaintext key appears in this response and nowhere else, ever.
pub async fn generate_api_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateKeyRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut required = Vec::new();
    if req.client_name.as_deref().unwrap_or("").trim().is_empty() {
        required.push("clientName");
    }
    if req.email.as_deref().unwrap_or("").trim().is_empty() {
        required.push("email");
    }
    if req.company_website.as_deref().unwrap_or("").trim().is_empty() {
        required.push("companyWebsite");
    }
    if req.phone_number.as_deref().unwrap_or("").trim().is_empty() {
        required.push("phoneNumber");
    }
    if !required.is_empty() {
        return Err(ApiError::missing_fields(required));
    }

    let issued = state.credentials.issue(
        req.client_name.as_deref().unwrap_or_default().trim(),
        req.email.as_deref().unwrap_or_default(),
        req.company_website.as_deref().unwrap_or_default(),
        req.phone_number.as_deref().unwrap_or_default(),
        req.description.as_deref(),
    )?;

    info!(key_id = %issued.key_id, "key issued via API");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "apiKey": issued.api_key,
            "keyId": issued.key_id,
            "createdAt": issued.created_at,
            "permissions": issued.permissions,
            "limits": {
                "perHour": issued.limits.per_hour,
                "perDay": issued.limits.per_day,
                "perMonth": issued.limits.per_month,
            },
            "warning": "Store this key securely. It cannot be retrieved again.",
        })),
    ))
}
