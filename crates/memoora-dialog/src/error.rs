use thiserror::Error;

#[derive(Debug, Error)]
pub enum DialogError {
    #[error("no conversation state for call {0}")]
    UnknownCall(String),

    #[error("unknown question id: {0}")]
    UnknownQuestion(String),

    #[error("invalid conversation flow: {0}")]
    InvalidFlow(String),

    #[error("failed to read questions file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DialogError>;
