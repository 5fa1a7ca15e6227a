use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid HMAC key length")]
    InvalidKeyLength,

    #[error("unserialisable notification event: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
