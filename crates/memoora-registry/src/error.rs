use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("call not found: {0}")]
    NotFound(String),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("recording reference already set for call {0}")]
    RecordingAlreadySet(String),

    #[error("provider SID already attached to call {0}")]
    SidAlreadyAttached(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal registry error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
