use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DialogError, Result};
use crate::types::{AnswerKind, ConversationState, NextPointer, Question};

/// Keywords that mark a prompt as touching the family-story domain.
const FAMILY_KEYWORDS: &[&str] = &[
    "family",
    "mother",
    "father",
    "grandmother",
    "grandfather",
    "grandparent",
    "brother",
    "sister",
    "parents",
    "child",
    "childhood",
    "memory",
    "memories",
    "story",
    "tradition",
    "wedding",
];

/// Dynamic-selection constants. The defaults are the tuned-by-usage values;
/// a `[scoring]` table in the questions file overrides them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub free_text: i32,
    pub multiple_choice: i32,
    pub yes_no: i32,
    pub context_reference: i32,
    pub family_keyword: i32,
    pub context_affinity: i32,
    pub answered_penalty: i32,
    pub short_prompt_bonus: i32,
    pub long_prompt_penalty: i32,
    pub medium_prompt_bonus: i32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            free_text: 10,
            multiple_choice: 8,
            yes_no: 6,
            context_reference: 5,
            family_keyword: 4,
            context_affinity: 3,
            answered_penalty: -100,
            short_prompt_bonus: 10,
            long_prompt_penalty: -10,
            medium_prompt_bonus: 8,
        }
    }
}

/// On-disk shape of the questions file.
#[derive(Debug, Deserialize)]
struct FlowFile {
    flow: FlowMeta,
    #[serde(default)]
    scoring: ScoringWeights,
    #[serde(rename = "questions")]
    questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct FlowMeta {
    first: String,
    closing: String,
}

/// The ordered question set with a distinguished first and closing
/// question. Built once at startup; immutable afterwards.
#[derive(Debug, Clone)]
pub struct ConversationFlow {
    questions: Vec<Question>,
    by_id: HashMap<String, usize>,
    first_id: String,
    closing_id: String,
    pub weights: ScoringWeights,
}

impl ConversationFlow {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FlowFile =
            toml::from_str(raw).map_err(|e| DialogError::InvalidFlow(e.to_string()))?;

        let mut by_id = HashMap::new();
        for (i, q) in file.questions.iter().enumerate() {
            if by_id.insert(q.id.clone(), i).is_some() {
                return Err(DialogError::InvalidFlow(format!(
                    "duplicate question id '{}'",
                    q.id
                )));
            }
        }
        for q in &file.questions {
            if let NextPointer::Static(target) = &q.next {
                if !by_id.contains_key(target) {
                    return Err(DialogError::InvalidFlow(format!(
                        "question '{}' points at unknown id '{}'",
                        q.id, target
                    )));
                }
            }
        }
        for id in [&file.flow.first, &file.flow.closing] {
            if !by_id.contains_key(id) {
                return Err(DialogError::InvalidFlow(format!(
                    "flow references unknown question id '{}'",
                    id
                )));
            }
        }

        Ok(Self {
            by_id,
            first_id: file.flow.first,
            closing_id: file.flow.closing,
            weights: file.scoring,
            questions: file.questions,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.by_id.get(id).map(|&i| &self.questions[i])
    }

    pub fn first(&self) -> &Question {
        &self.questions[self.by_id[&self.first_id]]
    }

    pub fn closing(&self) -> &Question {
        &self.questions[self.by_id[&self.closing_id]]
    }

    pub fn is_closing(&self, id: &str) -> bool {
        id == self.closing_id
    }

    pub fn question_ids(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(|q| q.id.as_str())
    }

    /// Substitute `{{slot}}` placeholders from the conversation context.
    /// Unknown slots are left in place so a bad template stays visible in
    /// logs instead of silently emitting an empty phrase.
    pub fn render_prompt(&self, question: &Question, context: &HashMap<String, String>) -> String {
        let mut rendered = question.prompt.clone();
        for (key, value) in context {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        }
        rendered
    }

    /// Score-driven selection over the not-yet-asked questions.
    ///
    /// Returns `None` when no candidate scores positive, which closes the
    /// call. Ties break on ascending question id for stable behavior.
    pub fn select_dynamic<'a>(
        &'a self,
        state: &ConversationState,
        remaining_secs: i64,
    ) -> Option<&'a Question> {
        let mut best: Option<(&Question, i32)> = None;
        for q in &self.questions {
            if self.is_closing(&q.id) {
                continue;
            }
            let score = self.score(q, state, remaining_secs);
            debug!(question = %q.id, score, "dynamic candidate scored");
            if score <= 0 {
                continue;
            }
            best = match best {
                Some((bq, bs)) if score < bs || (score == bs && q.id > bq.id) => Some((bq, bs)),
                _ => Some((q, score)),
            };
        }
        best.map(|(q, _)| q)
    }

    fn score(&self, q: &Question, state: &ConversationState, remaining_secs: i64) -> i32 {
        let w = &self.weights;
        let mut score = match q.kind {
            AnswerKind::FreeText => w.free_text,
            AnswerKind::MultipleChoice => w.multiple_choice,
            AnswerKind::YesNo => w.yes_no,
        };

        if state
            .context
            .iter()
            .any(|(key, value)| !value.is_empty() && q.prompt.contains(&format!("{{{{{key}}}}}")))
        {
            score += w.context_reference;
        }

        let prompt_lower = q.prompt.to_ascii_lowercase();
        if FAMILY_KEYWORDS.iter().any(|kw| prompt_lower.contains(kw)) {
            score += w.family_keyword;
        }

        if q.context_key.is_some() && !state.context.is_empty() {
            score += w.context_affinity;
        }

        if state.has_answered(&q.id) {
            score += w.answered_penalty;
        }

        let prompt_len = q.prompt.chars().count();
        if remaining_secs < 60 {
            if prompt_len < 100 {
                score += w.short_prompt_bonus;
            } else {
                score += w.long_prompt_penalty;
            }
        } else if remaining_secs < 120 && prompt_len < 150 {
            score += w.medium_prompt_bonus;
        }

        score
    }
}
