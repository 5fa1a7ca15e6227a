use tracing::{info, warn};

use memoora_core::config::CallerIdConfig;

use crate::client::TelephonyClient;
use crate::error::{Result, TelephonyError};
use crate::types::{
    CallSnapshot, CallerIdentity, Placement, PlacementOutcome, PlacementRequest, WebhookUrls,
};

/// Provider error codes meaning "the From you sent is not usable". Anything
/// in this set triggers the one-shot fallback to the configured number.
const INVALID_FROM_CODES: &[u32] = &[21210, 21211, 21212, 21606];
const INVALID_FROM_SUBSTRING: &str = "not a valid phone number";

/// Policy layer over the raw client: resolves the caller identity and
/// applies the alpha-label fallback before anything reaches the wire.
pub struct TelephonyAdapter {
    client: TelephonyClient,
    caller: CallerIdConfig,
}

impl TelephonyAdapter {
    pub fn new(client: TelephonyClient, caller: CallerIdConfig) -> Self {
        Self { client, caller }
    }

    /// Caller identity requested by configuration.
    pub fn caller_identity(&self) -> Result<CallerIdentity> {
        if self.caller.use_alpha_label {
            let label = self.caller.alpha_label.as_deref().unwrap_or_default();
            CallerIdentity::alpha(label, &self.caller.fallback_phone)
        } else {
            Ok(CallerIdentity::PhoneNumber(
                self.caller.fallback_phone.clone(),
            ))
        }
    }

    /// Place a call with the caller-identity fallback policy:
    /// one attempt with the preferred identity; if the provider rejects it
    /// with an "invalid from" error, exactly one retry with the fallback
    /// number. Any other error surfaces unchanged.
    pub async fn place(
        &self,
        to: &str,
        webhooks: WebhookUrls,
        timeout_secs: Option<u32>,
    ) -> Result<PlacementOutcome> {
        let identity = self.caller_identity()?;
        let preferred = identity.preferred().to_string();
        let request = PlacementRequest {
            to: to.to_string(),
            from: preferred.clone(),
            webhooks,
            timeout_secs,
        };

        match self.client.place_call(&request).await {
            Ok(placement) => Ok(outcome(placement, preferred, false, None)),
            Err(TelephonyError::Rejected { code, message }) if is_invalid_from(code, &message) => {
                let CallerIdentity::AlphaLabel { fallback, .. } = identity else {
                    // The preferred identity was already a number; nothing
                    // sensible to fall back to.
                    return Err(TelephonyError::Rejected { code, message });
                };
                warn!(
                    code,
                    reason = %message,
                    "alpha label rejected; retrying once with fallback number"
                );
                let retry = PlacementRequest {
                    from: fallback.clone(),
                    ..request
                };
                let placement = self.client.place_call(&retry).await?;
                info!(provider_sid = %placement.provider_sid, from = %fallback, "fallback placement succeeded");
                Ok(outcome(
                    placement,
                    fallback,
                    true,
                    Some(format!("{code}: {message}")),
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn fetch_status(&self, provider_sid: &str) -> Result<CallSnapshot> {
        self.client.fetch_status(provider_sid).await
    }

    pub async fn end_call(&self, provider_sid: &str) -> Result<()> {
        self.client.end_call(provider_sid).await
    }

    pub async fn download_recording(&self, media_url: &str) -> Result<reqwest::Response> {
        self.client.download_recording(media_url).await
    }
}

fn is_invalid_from(code: u32, message: &str) -> bool {
    INVALID_FROM_CODES.contains(&code)
        || message.to_ascii_lowercase().contains(INVALID_FROM_SUBSTRING)
}

fn outcome(
    placement: Placement,
    from_used: String,
    fallback_used: bool,
    fallback_reason: Option<String>,
) -> PlacementOutcome {
    PlacementOutcome {
        provider_sid: placement.provider_sid,
        initial_status: placement.initial_status,
        from_used,
        fallback_used,
        fallback_reason,
    }
}
