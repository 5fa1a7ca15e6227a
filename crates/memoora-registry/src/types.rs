use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use memoora_core::types::CallKind;

/// Call lifecycle states. `Completed` is the only successful terminal;
/// `Busy`, `NoAnswer`, `Failed`, and `Canceled` are terminal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Failed
                | CallStatus::Canceled
        )
    }

    /// The transition graph. `Answered -> InProgress` happens on the first
    /// prompt-handler hit; basic calls that never reach the prompt handler
    /// may complete straight from `Answered`.
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;
        if next == Canceled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Initiated, Ringing)
                | (Initiated, Busy)
                | (Initiated, NoAnswer)
                | (Initiated, Failed)
                | (Ringing, Answered)
                | (Ringing, Busy)
                | (Ringing, NoAnswer)
                | (Ringing, Failed)
                | (Answered, InProgress)
                | (Answered, Completed)
                | (Answered, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }

    /// Map a provider status-callback value onto our state set. The
    /// provider has no separate "answered" vs "in-progress": its
    /// `in-progress` means the callee picked up.
    pub fn from_provider(s: &str) -> Option<CallStatus> {
        match s {
            "queued" | "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "answered" | "in-progress" => Some(CallStatus::Answered),
            "completed" => Some(CallStatus::Completed),
            "busy" => Some(CallStatus::Busy),
            "no-answer" => Some(CallStatus::NoAnswer),
            "failed" => Some(CallStatus::Failed),
            "canceled" => Some(CallStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Failed => "failed",
            CallStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(CallStatus::Initiated),
            "ringing" => Ok(CallStatus::Ringing),
            "answered" => Ok(CallStatus::Answered),
            "in-progress" => Ok(CallStatus::InProgress),
            "completed" => Ok(CallStatus::Completed),
            "busy" => Ok(CallStatus::Busy),
            "no-answer" => Ok(CallStatus::NoAnswer),
            "failed" => Ok(CallStatus::Failed),
            "canceled" => Ok(CallStatus::Canceled),
            other => Err(format!("unknown call status: {}", other)),
        }
    }
}

/// Reference to the locally stored recording artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRef {
    pub filename: String,
    pub size_bytes: u64,
    pub duration_secs: Option<u32>,
}

/// Canonical record of one outbound call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// Locally unique id, assigned at creation.
    pub id: String,
    /// Provider identifier, set once after placement and immutable after.
    pub provider_sid: Option<String>,
    pub key_id: String,
    pub account_id: String,
    pub to: String,
    /// The "from" the provider actually used (number or alpha label).
    pub caller: String,
    pub kind: CallKind,
    pub status: CallStatus,
    pub question: Option<String>,
    pub initiated_at: String,
    pub answered_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_secs: Option<u32>,
    pub recording: Option<RecordingRef>,
    /// Set once the upstream notification is delivered.
    pub notified: bool,
    /// Free-form map: correlation ids, fallback info, provider extras.
    pub metadata: Map<String, Value>,
}

/// Inputs to `CallRegistry::create`.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub key_id: String,
    pub account_id: String,
    pub to: String,
    pub caller: String,
    pub kind: CallKind,
    pub question: Option<String>,
    pub metadata: Map<String, Value>,
}

/// What happened to a provider status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The transition was legal and has been persisted.
    Applied,
    /// The transition is not in the graph; state was left untouched.
    IgnoredIllegal,
    /// Older than the last applied provider event; dropped.
    Stale,
    /// No record carries this provider SID yet; buffered with a TTL.
    Buffered,
}

/// Filters for `list_by_credential`.
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub status: Option<CallStatus>,
    pub limit: Option<u32>,
}

/// Per-status counts for the stats surface.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CallCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
    pub recorded: u64,
}
