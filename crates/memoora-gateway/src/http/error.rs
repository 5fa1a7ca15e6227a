use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use memoora_core::error::{MemooraError, RateWindow};
use memoora_credentials::CredentialError;
use memoora_dialog::DialogError;
use memoora_registry::RegistryError;
use memoora_telephony::TelephonyError;

/// Client-facing error. Every failure leaving the API carries a stable
/// machine-readable `error` code plus a human message; rate limits add a
/// `retryAfter` hint.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn missing_fields(required: Vec<&'static str>) -> Self {
        let mut e = Self::new(
            StatusCode::BAD_REQUEST,
            "missing_fields",
            "Missing required fields",
        );
        e.details = Some(json!({ "required": required }));
        e
    }

    pub fn auth_required() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "auth_required", "x-api-key header is required")
    }

    pub fn permission_denied() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "permission_denied",
            "API key lacks the required permission",
        )
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", what)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal error",
        )
    }

    pub fn resource_exhausted() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "resource_exhausted",
            "worker pool saturated; try again shortly",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        if let Some(retry_after) = self.retry_after {
            body["retryAfter"] = json!(retry_after);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Unknown | CredentialError::Inactive => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "auth_invalid",
                "API key is unknown or revoked",
            ),
            CredentialError::RateLimited {
                window,
                retry_after_secs,
            } => {
                let code = match window {
                    RateWindow::Month => "quota_exceeded",
                    _ => "rate_limited",
                };
                let mut err = ApiError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    code,
                    format!("rate limit reached for the current {window} window"),
                );
                err.details = Some(json!({ "window": window.to_string() }));
                err.retry_after = Some(retry_after_secs);
                err
            }
            CredentialError::DomainRejected => ApiError::new(
                StatusCode::FORBIDDEN,
                "Unauthorized domain",
                "email domain is not allowed to sign up",
            ),
            CredentialError::MalformedEmail => ApiError::invalid_input("malformed email address"),
            CredentialError::MalformedWebsite => ApiError::invalid_input("malformed website URL"),
            CredentialError::MalformedPhone => {
                ApiError::invalid_input("phone number must be E.164, e.g. +13128484329")
            }
            CredentialError::TransientUnavailable(_) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream_unavailable",
                "credential store temporarily unavailable",
            ),
            CredentialError::Database(_) => ApiError::internal(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(what) => ApiError::not_found(format!("call {what} not found")),
            RegistryError::IllegalTransition { from, to } => {
                let mut err = ApiError::new(
                    StatusCode::CONFLICT,
                    "conflict_state",
                    format!("illegal transition {from} -> {to}"),
                );
                err.details = Some(json!({ "from": from, "to": to }));
                err
            }
            RegistryError::RecordingAlreadySet(_) | RegistryError::SidAlreadyAttached(_) => {
                ApiError::new(StatusCode::CONFLICT, "conflict_state", e.to_string())
            }
            RegistryError::Database(_) | RegistryError::Internal(_) => ApiError::internal(),
        }
    }
}

impl From<TelephonyError> for ApiError {
    fn from(e: TelephonyError) -> Self {
        match e {
            TelephonyError::Rejected { code, message } => {
                let mut err = ApiError::new(
                    StatusCode::BAD_GATEWAY,
                    "upstream_rejected",
                    format!("telephony provider rejected the call: {message}"),
                );
                err.details = Some(json!({ "providerCode": code }));
                err
            }
            TelephonyError::Transport(_) | TelephonyError::MediaNotReady => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "upstream_unavailable",
                "telephony provider unreachable",
            ),
            TelephonyError::Api { status, .. } => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "upstream_rejected",
                format!("telephony provider error (status {status})"),
            ),
            TelephonyError::InvalidCallerIdentity(msg) => ApiError::invalid_input(msg),
            TelephonyError::Xml(_) | TelephonyError::Utf8(_) => ApiError::internal(),
        }
    }
}

impl From<DialogError> for ApiError {
    fn from(e: DialogError) -> Self {
        match e {
            DialogError::UnknownCall(id) => ApiError::not_found(format!("conversation {id}")),
            _ => ApiError::internal(),
        }
    }
}

impl From<MemooraError> for ApiError {
    fn from(e: MemooraError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut err = ApiError {
            status,
            code: e.code(),
            message: e.to_string(),
            details: None,
            retry_after: e.retry_after(),
        };
        if let MemooraError::MissingFields { required } = &e {
            err.details = Some(json!({ "required": required }));
        }
        err
    }
}
