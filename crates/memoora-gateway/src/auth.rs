use axum::http::HeaderMap;

use memoora_credentials::types::{Permission, ValidatedKey};

use crate::app::AppState;
use crate::http::error::ApiError;

/// Resolve and rate-check the x-api-key header, then enforce the
/// permission the endpoint needs. Rate-limit and auth failures never
/// trigger retries anywhere in the core.
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    permission: Permission,
) -> Result<ValidatedKey, ApiError> {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(ApiError::auth_required)?;

    let validated = state.credentials.validate(key)?;
    if !validated.allows(permission) {
        return Err(ApiError::permission_denied());
    }
    Ok(validated)
}
