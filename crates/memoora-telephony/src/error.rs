use serde::Deserialize;
use thiserror::Error;

/// Error body the provider returns alongside non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderApiError {
    pub code: Option<u32>,
    pub message: Option<String>,
    pub status: Option<u16>,
}

/// Tagged result space for provider calls. Placement failures are split so
/// the caller-identity fallback is a plain match on `Rejected`, not string
/// sniffing inside a catch-all.
#[derive(Debug, Error)]
pub enum TelephonyError {
    /// The provider understood the request and refused it (4xx with a
    /// decoded error body).
    #[error("provider rejected the request (code {code}): {message}")]
    Rejected { code: u32, message: String },

    /// Non-2xx response without a usable error body, or a 5xx.
    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The media is not ready yet (404 on the recording URL). Retryable.
    #[error("recording media not yet available")]
    MediaNotReady,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("markup error: {0}")]
    Xml(#[from] xml::writer::Error),

    #[error("markup is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid caller identity: {0}")]
    InvalidCallerIdentity(String),
}

pub type Result<T> = std::result::Result<T, TelephonyError>;
