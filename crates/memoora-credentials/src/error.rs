use memoora_core::error::RateWindow;
use thiserror::Error;

/// Credential-layer errors. Kept separate from the shared taxonomy so the
/// gateway decides the HTTP mapping without coupling layers.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No credential matches the presented key digest. Distinct from
    /// `TransientUnavailable`: callers must never conflate the two.
    #[error("unknown API key")]
    Unknown,

    #[error("API key has been revoked")]
    Inactive,

    #[error("rate limit reached for the current {window} window")]
    RateLimited {
        window: RateWindow,
        retry_after_secs: u64,
    },

    #[error("email domain is not allowed to sign up")]
    DomainRejected,

    #[error("malformed email address")]
    MalformedEmail,

    #[error("malformed website URL")]
    MalformedWebsite,

    #[error("malformed phone number")]
    MalformedPhone,

    /// The persistence layer failed transiently (lock contention, disk).
    /// Retryable; not an authentication verdict.
    #[error("credential store temporarily unavailable: {0}")]
    TransientUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CredentialError>;
