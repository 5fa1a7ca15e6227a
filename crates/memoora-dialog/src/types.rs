use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Expected shape of a callee's answer. Drives the dynamic-selection
/// affinity score: open-ended questions surface richer stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnswerKind {
    FreeText,
    MultipleChoice,
    YesNo,
}

/// Mechanical validation applied to a normalized answer, independent of the
/// reasoning client's semantic verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationRule {
    NonEmpty,
    IntegerInRange { min: i64, max: i64 },
    #[default]
    None,
}

impl ValidationRule {
    pub fn check(&self, normalized: &str) -> bool {
        match self {
            ValidationRule::NonEmpty => !normalized.trim().is_empty(),
            ValidationRule::IntegerInRange { min, max } => normalized
                .trim()
                .parse::<i64>()
                .map(|n| (*min..=*max).contains(&n))
                .unwrap_or(false),
            ValidationRule::None => true,
        }
    }
}

/// Where a question points after being answered. `end` closes the call,
/// `dynamic` hands selection to the scorer, anything else is a question id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NextPointer {
    Static(String),
    End,
    Dynamic,
}

impl From<String> for NextPointer {
    fn from(s: String) -> Self {
        match s.as_str() {
            "end" => NextPointer::End,
            "dynamic" => NextPointer::Dynamic,
            _ => NextPointer::Static(s),
        }
    }
}

impl From<NextPointer> for String {
    fn from(p: NextPointer) -> Self {
        match p {
            NextPointer::Static(id) => id,
            NextPointer::End => "end".to_string(),
            NextPointer::Dynamic => "dynamic".to_string(),
        }
    }
}

impl Default for NextPointer {
    fn default() -> Self {
        NextPointer::Dynamic
    }
}

/// One declarative node of the conversation flow. Loaded once at startup
/// and immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    /// May reference context slots via `{{name}}` placeholders.
    pub prompt: String,
    pub kind: AnswerKind,
    #[serde(default)]
    pub validation: ValidationRule,
    /// Context slot populated from this question's normalized answer.
    #[serde(default)]
    pub context_key: Option<String>,
    #[serde(default)]
    pub next: NextPointer,
}

/// One recorded callee answer.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question_id: String,
    pub raw_transcript: String,
    pub normalized: String,
    pub recorded_at: DateTime<Utc>,
}

/// What the prompt handler should do on its next hit for this call.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogPhase {
    /// Speak the current question and record.
    Asking,
    /// A recording callback is being processed; the next prompt is not
    /// decided yet.
    AwaitingTurn,
    /// Re-ask the current question with feedback first.
    Retrying(String),
    /// Speak the closing text and hang up.
    Closing(String),
}

/// Per-live-call conversation state. Mutated only by the turn processor and
/// end-of-call cleanup; the prompt handler reads snapshots.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub call_id: String,
    pub current_question_id: String,
    pub answers: Vec<Answer>,
    /// Named values extracted from answers (e.g. the caller's first name).
    pub context: HashMap<String, String>,
    pub phase: DialogPhase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn has_answered(&self, question_id: &str) -> bool {
        self.answers.iter().any(|a| a.question_id == question_id)
    }

    pub fn answered_ids(&self) -> Vec<&str> {
        self.answers.iter().map(|a| a.question_id.as_str()).collect()
    }
}

/// Point-in-time view handed to the prompt handler. Rendering happened
/// under the state lock; the handler never touches the state itself.
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub phase: DialogPhase,
    pub question_id: String,
    /// Current prompt with `{{slot}}` placeholders substituted.
    pub rendered_prompt: String,
}

/// Decision for the next turn.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    ContinueWith(Question),
    Retry(String),
    Close(String),
}

/// Structured verdict from the reasoning client about one answer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnAnalysis {
    pub valid: bool,
    pub summary: Option<String>,
    pub should_proceed: bool,
    pub next_question_id: Option<String>,
    pub feedback: Option<String>,
}

impl TurnAnalysis {
    /// Fallback verdict used when the reasoning client is unavailable:
    /// accept the answer and follow the static pointer.
    pub fn static_fallback() -> Self {
        TurnAnalysis {
            valid: true,
            summary: None,
            should_proceed: true,
            next_question_id: None,
            feedback: None,
        }
    }
}
