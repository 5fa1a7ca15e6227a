use serde::{Deserialize, Serialize};

/// Outbound call flavor. Basic calls speak one prompt and record a single
/// answer; interactive calls run the full turn-based dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Basic,
    Interactive,
}

impl CallKind {
    /// Accepted `callType` strings, case-insensitive. The `interactive`
    /// boolean in the call request folds into the same enum.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Some(CallKind::Basic),
            "interactive" => Some(CallKind::Interactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Basic => "basic",
            CallKind::Interactive => "interactive",
        }
    }
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// E.164 phone number: `+` followed by 8 to 15 digits, first digit nonzero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix('+')?;
        if !(8..=15).contains(&digits.len()) {
            return None;
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if digits.starts_with('0') {
            return None;
        }
        Some(PhoneNumber(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First characters of an API key, for log lines. The full key value must
/// never reach a log or a persisted row after issuance.
pub fn key_preview(key: &str) -> &str {
    &key[..key.len().min(8)]
}
