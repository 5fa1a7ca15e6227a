use thiserror::Error;

/// Which usage window tripped a rate-limit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    Hour,
    Day,
    Month,
}

impl std::fmt::Display for RateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateWindow::Hour => write!(f, "hour"),
            RateWindow::Day => write!(f, "day"),
            RateWindow::Month => write!(f, "month"),
        }
    }
}

/// Shared failure taxonomy. Client-facing handlers map these onto HTTP
/// statuses and stable machine-readable codes; internal callers match on
/// variants to pick retry behavior.
#[derive(Debug, Error)]
pub enum MemooraError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required fields: {}", required.join(", "))]
    MissingFields { required: Vec<String> },

    #[error("API key required")]
    AuthRequired,

    #[error("API key is unknown or revoked")]
    AuthInvalid,

    #[error("Rate limit exceeded for the current {window} window")]
    RateLimited {
        window: RateWindow,
        retry_after_secs: u64,
    },

    #[error("Monthly quota exhausted")]
    QuotaExceeded { retry_after_secs: u64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Illegal state transition: {from} -> {to}")]
    ConflictState { from: String, to: String },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream rejected the request ({status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Worker pool saturated")]
    ResourceExhausted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemooraError {
    /// Stable machine-readable code sent to clients in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MemooraError::InvalidInput(_) => "invalid_input",
            MemooraError::MissingFields { .. } => "missing_fields",
            MemooraError::AuthRequired => "auth_required",
            MemooraError::AuthInvalid => "auth_invalid",
            MemooraError::RateLimited { .. } => "rate_limited",
            MemooraError::QuotaExceeded { .. } => "quota_exceeded",
            MemooraError::NotFound(_) => "not_found",
            MemooraError::ConflictState { .. } => "conflict_state",
            MemooraError::UpstreamUnavailable(_) => "upstream_unavailable",
            MemooraError::UpstreamRejected { .. } => "upstream_rejected",
            MemooraError::ResourceExhausted => "resource_exhausted",
            MemooraError::Config(_) => "config_error",
            MemooraError::Database(_) => "database_error",
            MemooraError::Serialization(_) => "serialization_error",
            MemooraError::Io(_) => "io_error",
            MemooraError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status the client-facing API responds with.
    pub fn http_status(&self) -> u16 {
        match self {
            MemooraError::InvalidInput(_) | MemooraError::MissingFields { .. } => 400,
            MemooraError::AuthRequired | MemooraError::AuthInvalid => 401,
            MemooraError::RateLimited { .. } | MemooraError::QuotaExceeded { .. } => 429,
            MemooraError::NotFound(_) => 404,
            MemooraError::ConflictState { .. } => 409,
            MemooraError::UpstreamUnavailable(_) => 502,
            MemooraError::UpstreamRejected { .. } => 502,
            MemooraError::ResourceExhausted => 503,
            _ => 500,
        }
    }

    /// Seconds-until-retry hint for 429 responses.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            MemooraError::RateLimited {
                retry_after_secs, ..
            }
            | MemooraError::QuotaExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MemooraError>;
