use serde::Deserialize;

use crate::error::TelephonyError;

/// Longest alpha sender id the PSTN supports.
const MAX_ALPHA_LABEL: usize = 11;

/// What the callee's phone displays as the caller. An alpha label always
/// carries a phone-number fallback because many destination carriers reject
/// alphanumeric senders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    PhoneNumber(String),
    AlphaLabel { label: String, fallback: String },
}

impl CallerIdentity {
    pub fn alpha(label: &str, fallback: &str) -> Result<Self, TelephonyError> {
        if label.is_empty() || label.len() > MAX_ALPHA_LABEL {
            return Err(TelephonyError::InvalidCallerIdentity(format!(
                "alpha label must be 1..={MAX_ALPHA_LABEL} characters"
            )));
        }
        Ok(CallerIdentity::AlphaLabel {
            label: label.to_string(),
            fallback: fallback.to_string(),
        })
    }

    /// The "from" value presented to the provider on the first attempt.
    pub fn preferred(&self) -> &str {
        match self {
            CallerIdentity::PhoneNumber(n) => n,
            CallerIdentity::AlphaLabel { label, .. } => label,
        }
    }
}

/// Webhook URLs registered with the provider at placement time.
#[derive(Debug, Clone)]
pub struct WebhookUrls {
    pub voice_url: String,
    pub status_callback: String,
}

/// Inputs to a placement attempt.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub to: String,
    pub from: String,
    pub webhooks: WebhookUrls,
    pub timeout_secs: Option<u32>,
}

/// Successful placement.
#[derive(Debug, Clone)]
pub struct Placement {
    pub provider_sid: String,
    pub initial_status: String,
}

/// Placement result after the caller-identity policy has run.
#[derive(Debug, Clone)]
pub struct PlacementOutcome {
    pub provider_sid: String,
    pub initial_status: String,
    /// The "from" the provider accepted.
    pub from_used: String,
    pub fallback_used: bool,
    /// Provider's rejection reason when the alpha label was refused.
    pub fallback_reason: Option<String>,
}

/// Subset of the provider's call resource the adapter surfaces.
#[derive(Debug, Clone, Deserialize)]
pub struct CallResource {
    pub sid: String,
    pub status: Option<String>,
    pub duration: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Point-in-time status fetched from the provider.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub status: String,
    pub duration_secs: Option<u32>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}
