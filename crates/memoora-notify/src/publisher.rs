use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use memoora_core::clock::Clock;
use memoora_core::config::UpstreamConfig;

use crate::error::NotifyError;
use crate::signer::signature_header;
use crate::types::{DeliveryOutcome, NotificationEvent};

const QUEUE_DEPTH: usize = 256;

/// Retry shape for upstream delivery: capped exponential backoff on
/// network errors and 5xx, nothing on 4xx.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Cheap-to-clone enqueue side of the publisher.
#[derive(Clone)]
pub struct PublisherHandle {
    tx: mpsc::Sender<NotificationEvent>,
}

impl PublisherHandle {
    /// Queue an event for delivery. Non-blocking: a full queue drops the
    /// event with an error log rather than stalling the turn pipeline.
    pub fn enqueue(&self, event: NotificationEvent) {
        if let Err(e) = self.tx.try_send(event) {
            error!(error = %e, "notification queue full or closed; event dropped");
        }
    }
}

/// Start the publisher worker. Events flow in through the returned handle;
/// terminal outcomes flow out through `outcome_tx` so the registry can
/// record delivery.
pub fn spawn_publisher(
    cfg: UpstreamConfig,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    outcome_tx: mpsc::Sender<DeliveryOutcome>,
    mut shutdown: watch::Receiver<bool>,
) -> PublisherHandle {
    let (tx, mut rx) = mpsc::channel::<NotificationEvent>(QUEUE_DEPTH);

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        info!("notification publisher started");
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let outcome = deliver(&client, &cfg, &policy, clock.as_ref(), &event).await;
                    if outcome_tx.send(outcome).await.is_err() {
                        warn!("outcome channel closed; publisher results are unobserved");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("notification publisher shutting down");
                        break;
                    }
                }
            }
        }
    });

    PublisherHandle { tx }
}

/// One POST per attempt. The body is serialised exactly once; the same
/// bytes are signed and transmitted so the receiver can verify the HMAC.
async fn deliver(
    client: &reqwest::Client,
    cfg: &UpstreamConfig,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    event: &NotificationEvent,
) -> DeliveryOutcome {
    let url = format!(
        "{}/api/calls/recording-complete",
        cfg.base_url.trim_end_matches('/')
    );
    let body = match serde_json::to_vec(event).map_err(NotifyError::from) {
        Ok(b) => b,
        Err(e) => {
            error!(call_sid = %event.call_sid, error = %e, "unserialisable notification event");
            return DeliveryOutcome {
                call_sid: event.call_sid.clone(),
                delivered: false,
                attempts: 0,
                status: None,
            };
        }
    };

    let mut last_status = None;
    let mut delay = policy.base_delay;
    for attempt in 1..=policy.max_attempts {
        let timestamp = clock.unix_secs().to_string();
        let signature = match signature_header(&cfg.api_key, &timestamp, &body) {
            Ok(s) => s,
            Err(e) => {
                error!(call_sid = %event.call_sid, error = %e, "could not sign notification");
                return DeliveryOutcome {
                    call_sid: event.call_sid.clone(),
                    delivered: false,
                    attempts: attempt,
                    status: None,
                };
            }
        };

        let mut request = client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-api-key", cfg.api_key.clone())
            .header("x-timestamp", timestamp)
            .header("x-signature", signature)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .body(body.clone());
        if let Some(account_id) = &cfg.account_id {
            request = request.header("x-account-id", account_id.clone());
        }

        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                last_status = Some(status);
                if resp.status().is_success() {
                    info!(call_sid = %event.call_sid, attempt, "recording notification delivered");
                    return DeliveryOutcome {
                        call_sid: event.call_sid.clone(),
                        delivered: true,
                        attempts: attempt,
                        status: last_status,
                    };
                }
                if (400..500).contains(&status) {
                    // The upstream refused the event; retrying cannot help.
                    error!(
                        call_sid = %event.call_sid,
                        status,
                        "upstream rejected recording notification"
                    );
                    return DeliveryOutcome {
                        call_sid: event.call_sid.clone(),
                        delivered: false,
                        attempts: attempt,
                        status: last_status,
                    };
                }
                warn!(call_sid = %event.call_sid, status, attempt, "upstream 5xx; will retry");
            }
            Err(e) => {
                warn!(call_sid = %event.call_sid, attempt, error = %e, "notification POST failed; will retry");
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(policy.max_delay);
        }
    }

    error!(
        call_sid = %event.call_sid,
        attempts = policy.max_attempts,
        "recording notification exhausted retries"
    );
    DeliveryOutcome {
        call_sid: event.call_sid.clone(),
        delivered: false,
        attempts: policy.max_attempts,
        status: last_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoora_core::clock::SystemClock;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn upstream(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            base_url: server.uri(),
            api_key: "shared-secret".into(),
            account_id: Some("acct-9".into()),
            request_timeout_secs: 5,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    fn event() -> NotificationEvent {
        NotificationEvent {
            call_sid: "CA1".into(),
            filename: "story-1754049600000.mp3".into(),
            duration_seconds: Some(42),
            file_size: 52_000,
            storyteller_id: Some("st-7".into()),
            family_member_id: None,
            question: Some("Tell me about your childhood.".into()),
        }
    }

    #[tokio::test]
    async fn delivers_with_valid_signature_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/calls/recording-complete"))
            .and(header("x-api-key", "shared-secret"))
            .and(header("x-account-id", "acct-9"))
            .and(header_exists("x-timestamp"))
            .and(header_exists("x-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = deliver(
            &reqwest::Client::new(),
            &upstream(&server),
            &fast_policy(),
            &SystemClock,
            &event(),
        )
        .await;
        assert!(outcome.delivered);
        assert_eq!(outcome.attempts, 1);

        // Recompute the HMAC over the received bytes and timestamp.
        let received: Vec<Request> = server.received_requests().await.unwrap();
        let req = &received[0];
        let ts = req.headers.get("x-timestamp").unwrap().to_str().unwrap();
        let sig = req.headers.get("x-signature").unwrap().to_str().unwrap();
        assert_eq!(
            sig,
            signature_header("shared-secret", ts, &req.body).unwrap()
        );
    }

    #[tokio::test]
    async fn retries_on_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = deliver(
            &reqwest::Client::new(),
            &upstream(&server),
            &fast_policy(),
            &SystemClock,
            &event(),
        )
        .await;
        assert!(outcome.delivered);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn four_xx_is_never_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = deliver(
            &reqwest::Client::new(),
            &upstream(&server),
            &fast_policy(),
            &SystemClock,
            &event(),
        )
        .await;
        assert!(!outcome.delivered);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.status, Some(403));
    }

    #[tokio::test]
    async fn exhausted_retries_report_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = deliver(
            &reqwest::Client::new(),
            &upstream(&server),
            &fast_policy(),
            &SystemClock,
            &event(),
        )
        .await;
        assert!(!outcome.delivered);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status, Some(500));
    }

    #[tokio::test]
    async fn worker_drains_queue_and_reports_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (outcome_tx, mut outcome_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_publisher(
            upstream(&server),
            fast_policy(),
            Arc::new(SystemClock),
            outcome_tx,
            shutdown_rx,
        );

        handle.enqueue(event());
        let outcome = outcome_rx.recv().await.unwrap();
        assert_eq!(outcome.call_sid, "CA1");
        assert!(outcome.delivered);
    }
}
