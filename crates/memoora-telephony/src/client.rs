use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ProviderApiError, Result, TelephonyError};
use crate::types::{CallResource, CallSnapshot, Placement, PlacementRequest};

const API_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin REST client for the telephony provider. This is the only place in
/// the workspace that speaks the provider's wire format.
#[derive(Clone, Debug)]
pub struct TelephonyClient {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    base_url: String,
}

impl TelephonyClient {
    pub fn new(account_sid: &str, auth_token: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }

    fn call_url(&self, provider_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, provider_sid
        )
    }

    /// Place one outbound call. Not idempotent at the provider: the call
    /// registry guards against duplicate placements upstream.
    pub async fn place_call(&self, req: &PlacementRequest) -> Result<Placement> {
        let mut form = vec![
            ("To", req.to.clone()),
            ("From", req.from.clone()),
            ("Url", req.webhooks.voice_url.clone()),
            ("Method", "POST".to_string()),
            ("StatusCallback", req.webhooks.status_callback.clone()),
            ("StatusCallbackMethod", "POST".to_string()),
        ];
        for event in ["initiated", "ringing", "answered", "completed"] {
            form.push(("StatusCallbackEvent", event.to_string()));
        }
        if let Some(timeout) = req.timeout_secs {
            form.push(("Timeout", timeout.to_string()));
        }

        debug!(to = %req.to, from = %req.from, "placing outbound call");

        let resp = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(API_TIMEOUT)
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(decode_api_error(resp).await);
        }

        let resource: CallResource = resp.json().await?;
        Ok(Placement {
            initial_status: resource.status.unwrap_or_else(|| "queued".to_string()),
            provider_sid: resource.sid,
        })
    }

    /// Fetch the provider's current view of a call.
    pub async fn fetch_status(&self, provider_sid: &str) -> Result<CallSnapshot> {
        let resp = self
            .http
            .get(self.call_url(provider_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(API_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(decode_api_error(resp).await);
        }

        let resource: CallResource = resp.json().await?;
        Ok(CallSnapshot {
            status: resource.status.unwrap_or_default(),
            duration_secs: resource.duration.and_then(|d| d.parse().ok()),
            started_at: resource.start_time,
            ended_at: resource.end_time,
        })
    }

    /// Ask the provider to hang up an in-flight call.
    pub async fn end_call(&self, provider_sid: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.call_url(provider_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(API_TIMEOUT)
            .form(&[("Status", "completed")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(decode_api_error(resp).await);
        }
        Ok(())
    }

    /// Authenticated GET against a provider media URL. 404 means the
    /// recording is not ready yet; the fetcher retries with backoff.
    /// Returns the open response so the caller can stream the body to disk.
    pub async fn download_recording(&self, media_url: &str) -> Result<reqwest::Response> {
        let resp = self
            .http
            .get(media_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        match resp.status().as_u16() {
            200..=299 => Ok(resp),
            404 => Err(TelephonyError::MediaNotReady),
            status => {
                let message = resp.text().await.unwrap_or_default();
                warn!(status, "recording download failed");
                Err(TelephonyError::Api { status, message })
            }
        }
    }
}

/// Pull the provider's error body apart. 4xx with a decoded `code` becomes
/// `Rejected` so placement policy can match on it; everything else is `Api`.
async fn decode_api_error(resp: reqwest::Response) -> TelephonyError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    if (400..500).contains(&status) {
        if let Ok(body) = serde_json::from_str::<ProviderApiError>(&text) {
            if let Some(code) = body.code {
                return TelephonyError::Rejected {
                    code,
                    message: body.message.unwrap_or_default(),
                };
            }
        }
    }
    warn!(status, body = %text, "provider API error");
    TelephonyError::Api {
        status,
        message: text,
    }
}
