use async_trait::async_trait;

use memoora_dialog::types::TurnAnalysis;

/// Everything the reasoning client needs to judge one answer and pick the
/// next turn.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub question_id: String,
    pub question_prompt: String,
    pub transcript: String,
    /// Compact `key=value; ...` summary of the conversation context.
    pub context_summary: String,
    /// Question ids the model is allowed to pick from, closing included.
    pub allowed_next: Vec<String>,
}

/// Common failure space for the three capability clients.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unparseable response: {0}")]
    Parse(String),

    #[error("capability not available: {0}")]
    Unavailable(String),
}

/// Text to spoken audio (mp3 bytes). Used to pre-render question prompts
/// before the prompt webhook needs them.
#[async_trait]
pub trait Synthesis: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap probe so callers can fall back to `<Say>` markup gracefully.
    fn available(&self) -> bool;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AiError>;
}

/// Recorded audio to transcript.
#[async_trait]
pub trait Recognition: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// `filename` hints the container format to the service.
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, AiError>;
}

/// Transcript + question to a structured turn verdict.
#[async_trait]
pub trait Reasoning: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    async fn analyze(&self, req: &AnalysisRequest) -> Result<TurnAnalysis, AiError>;
}
