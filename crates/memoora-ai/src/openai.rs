use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use memoora_core::config::OpenAiConfig;
use memoora_dialog::types::TurnAnalysis;

use crate::provider::{AiError, AnalysisRequest, Reasoning, Recognition, Synthesis};

/// Shared construction for the three OpenAI-backed capabilities. Each
/// capability is a separate value so the gateway can mix providers later.
#[derive(Clone)]
struct OpenAiBase {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBase {
    fn new(cfg: &OpenAiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: cfg.api_key.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

async fn error_from(resp: reqwest::Response) -> AiError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    warn!(status, body = %message, "AI API error");
    AiError::Api { status, message }
}

// ── Synthesis ────────────────────────────────────────────────────────────────

pub struct OpenAiSynthesis {
    base: OpenAiBase,
    model: String,
    voice: String,
}

impl OpenAiSynthesis {
    pub fn new(cfg: &OpenAiConfig) -> Self {
        Self {
            base: OpenAiBase::new(cfg),
            model: cfg.tts_model.clone(),
            voice: cfg.tts_voice.clone(),
        }
    }
}

#[async_trait]
impl Synthesis for OpenAiSynthesis {
    fn name(&self) -> &str {
        "openai-tts"
    }

    fn available(&self) -> bool {
        self.base.configured()
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AiError> {
        debug!(chars = text.len(), "synthesizing prompt audio");
        let resp = self
            .base
            .client
            .post(format!("{}/v1/audio/speech", self.base.base_url))
            .bearer_auth(&self.base.api_key)
            .json(&json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
                "response_format": "mp3",
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

// ── Recognition ──────────────────────────────────────────────────────────────

pub struct OpenAiRecognition {
    base: OpenAiBase,
    model: String,
}

impl OpenAiRecognition {
    pub fn new(cfg: &OpenAiConfig) -> Self {
        Self {
            base: OpenAiBase::new(cfg),
            model: cfg.transcribe_model.clone(),
        }
    }
}

#[async_trait]
impl Recognition for OpenAiRecognition {
    fn name(&self) -> &str {
        "openai-whisper"
    }

    fn available(&self) -> bool {
        self.base.configured()
    }

    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, AiError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(filename.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let resp = self
            .base
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base.base_url))
            .bearer_auth(&self.base.api_key)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }

        #[derive(Deserialize)]
        struct Transcription {
            text: String,
        }
        let body: Transcription = resp
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        Ok(body.text)
    }
}

// ── Reasoning ────────────────────────────────────────────────────────────────

pub struct OpenAiReasoning {
    base: OpenAiBase,
    model: String,
}

impl OpenAiReasoning {
    pub fn new(cfg: &OpenAiConfig) -> Self {
        Self {
            base: OpenAiBase::new(cfg),
            model: cfg.reasoning_model.clone(),
        }
    }

    fn build_prompt(req: &AnalysisRequest) -> String {
        format!(
            "You are guiding a warm phone conversation that collects personal \
             stories from an elderly storyteller.\n\n\
             Question asked ({id}): {question}\n\
             Caller's transcribed answer: {transcript}\n\
             Known context: {context}\n\
             Question ids you may choose next: {allowed}\n\n\
             Judge the answer and reply with JSON only:\n\
             {{\"valid\": bool, \"summary\": string, \"shouldProceed\": bool, \
             \"nextQuestionId\": string or null, \"feedback\": string or null}}\n\
             Set feedback only when the caller should retry the same question.",
            id = req.question_id,
            question = req.question_prompt,
            transcript = req.transcript,
            context = if req.context_summary.is_empty() {
                "(none)"
            } else {
                req.context_summary.as_str()
            },
            allowed = req.allowed_next.join(", "),
        )
    }
}

#[async_trait]
impl Reasoning for OpenAiReasoning {
    fn name(&self) -> &str {
        "openai-chat"
    }

    fn available(&self) -> bool {
        self.base.configured()
    }

    async fn analyze(&self, req: &AnalysisRequest) -> Result<TurnAnalysis, AiError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You analyze one conversation turn and respond with a single JSON object."},
                {"role": "user", "content": Self::build_prompt(req)},
            ],
            "response_format": {"type": "json_object"},
            "max_tokens": 300,
        });

        let resp = self
            .base
            .client
            .post(format!("{}/v1/chat/completions", self.base.base_url))
            .bearer_auth(&self.base.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }

        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let content = api
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AiError::Parse("empty completion".into()))?;

        let analysis: TurnAnalysis = serde_json::from_str(content.trim())
            .map_err(|e| AiError::Parse(format!("bad analysis JSON: {e}")))?;
        debug!(
            question = %req.question_id,
            proceed = analysis.should_proceed,
            next = analysis.next_question_id.as_deref().unwrap_or("-"),
            "turn analyzed"
        );
        Ok(analysis)
    }
}
