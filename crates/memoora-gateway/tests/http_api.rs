// End-to-end exercises against the assembled router: key issuance, rate
// limiting, call placement against a mocked provider, the recording
// pipeline, and the signed upstream notification.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::{mpsc, watch};
use tower::util::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use memoora_core::clock::{Clock, SystemClock};
use memoora_core::config::{
    AiConfig, CallerIdConfig, ClockConfig, DatabaseConfig, DialogConfig, LimitsConfig,
    MemooraConfig, ServerConfig, SignupConfig, StorageConfig, TelephonyConfig, UpstreamConfig,
};
use memoora_credentials::types::RateLimits;
use memoora_credentials::CredentialStore;
use memoora_dialog::{ConversationFlow, DialogEngine};
use memoora_gateway::app::{build_router, AppState};
use memoora_notify::publisher::{spawn_publisher, RetryPolicy};
use memoora_registry::CallRegistry;
use memoora_telephony::{TelephonyAdapter, TelephonyClient};

const FLOW_TOML: &str = r#"
[flow]
first = "q1"
closing = "closing"

[[questions]]
id = "q1"
prompt = "Hello! What is your first name?"
kind = "free-text"
validation = "non-empty"
context_key = "name"
next = "q2"

[[questions]]
id = "q2"
prompt = "Tell me a story from your childhood."
kind = "free-text"
next = "dynamic"

[[questions]]
id = "closing"
prompt = "Thank you for sharing, {{name}}. Goodbye!"
kind = "free-text"
next = "end"
"#;

struct TestHarness {
    router: Router,
    state: Arc<AppState>,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
    _shutdown: watch::Sender<bool>,
}

async fn harness(provider: &MockServer, upstream: &MockServer, per_hour: u32) -> TestHarness {
    let recordings_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();

    let config = MemooraConfig {
        server: ServerConfig {
            port: 0,
            bind: "127.0.0.1".into(),
            public_base_url: "https://calls.test.example".into(),
        },
        signup: SignupConfig::default(),
        telephony: TelephonyConfig {
            account_sid: "AC123".into(),
            auth_token: "token".into(),
            base_url: provider.uri(),
            caller: CallerIdConfig {
                use_alpha_label: false,
                alpha_label: None,
                fallback_phone: "+17085547471".into(),
            },
        },
        ai: AiConfig::default(),
        upstream: UpstreamConfig {
            base_url: upstream.uri(),
            api_key: "shared-secret".into(),
            account_id: None,
            request_timeout_secs: 5,
        },
        limits: LimitsConfig {
            calls_per_hour: per_hour,
            ..LimitsConfig::default()
        },
        storage: StorageConfig {
            recordings_dir: recordings_dir.path().to_string_lossy().into_owned(),
            temp_dir: temp_dir.path().to_string_lossy().into_owned(),
        },
        database: DatabaseConfig::default(),
        dialog: DialogConfig::default(),
        clock: ClockConfig::default(),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let credentials = CredentialStore::new(
        Connection::open_in_memory().unwrap(),
        clock.clone(),
        chrono_tz::UTC,
        config.signup.clone(),
        RateLimits {
            per_hour: config.limits.calls_per_hour,
            per_day: config.limits.calls_per_day,
            per_month: config.limits.calls_per_month,
        },
    )
    .unwrap();
    let registry = CallRegistry::new(Connection::open_in_memory().unwrap(), clock.clone()).unwrap();
    let flow = Arc::new(ConversationFlow::from_toml_str(FLOW_TOML).unwrap());
    let dialog = DialogEngine::new(flow, clock.clone(), config.limits.max_call_secs);
    let telephony = TelephonyAdapter::new(
        TelephonyClient::new("AC123", "token", &provider.uri()),
        config.telephony.caller.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (outcome_tx, mut outcome_rx) = mpsc::channel(16);
    let notifier = spawn_publisher(
        config.upstream.clone(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        clock.clone(),
        outcome_tx,
        shutdown_rx,
    );

    let state = Arc::new(AppState::new(
        config, clock, credentials, registry, dialog, telephony, None, None, None, notifier,
    ));

    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(outcome) = outcome_rx.recv().await {
                let _ = state
                    .registry
                    .mark_notified(&outcome.call_sid, outcome.delivered);
            }
        });
    }

    TestHarness {
        router: build_router(state.clone()),
        state,
        _dirs: (recordings_dir, temp_dir),
        _shutdown: shutdown_tx,
    }
}

async fn post_json(router: &Router, uri: &str, key: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn post_form(router: &Router, uri: &str, form: &[(&str, &str)]) -> StatusCode {
    let body = form
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

async fn get_json(router: &Router, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn urlencode(v: &str) -> String {
    v.replace('%', "%25")
        .replace('+', "%2B")
        .replace('/', "%2F")
        .replace(':', "%3A")
        .replace(' ', "%20")
        .replace(',', "%2C")
}

fn key_request() -> Value {
    json!({
        "clientName": "Acme Stories",
        "email": "ops@acme.example",
        "companyWebsite": "https://acme.example",
        "phoneNumber": "+13128484329",
        "description": "family stories"
    })
}

async fn issue_key(router: &Router) -> String {
    let (status, body) = post_json(router, "/generate-api-key", None, key_request()).await;
    assert_eq!(status, StatusCode::CREATED);
    let key = body["apiKey"].as_str().unwrap().to_string();
    assert!(key.starts_with("mk_"));
    assert!(body["warning"].as_str().unwrap().contains("cannot be retrieved"));
    key
}

fn mock_placement(provider_sid: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "sid": provider_sid,
            "status": "queued"
        })))
}

#[tokio::test]
async fn health_is_open() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    let h = harness(&provider, &upstream, 10).await;

    let (status, body) = get_json(&h.router, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["capabilities"]["synthesis"], "not-configured");
}

#[tokio::test]
async fn key_issuance_validates_required_fields() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    let h = harness(&provider, &upstream, 10).await;

    let (status, body) = post_json(
        &h.router,
        "/generate-api-key",
        None,
        json!({ "clientName": "Acme" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let required: Vec<&str> = body["details"]["required"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(required.contains(&"email"));
    assert!(required.contains(&"companyWebsite"));
    assert!(required.contains(&"phoneNumber"));

    issue_key(&h.router).await;
}

#[tokio::test]
async fn call_requires_key_and_valid_phone() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    let h = harness(&provider, &upstream, 10).await;

    let (status, _) = post_json(&h.router, "/call", None, json!({"phoneNumber": "+13128484329"})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let key = issue_key(&h.router).await;
    let (status, body) =
        post_json(&h.router, "/call", Some(&key), json!({"phoneNumber": "312-848"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn basic_call_happy_path_with_recording_and_notification() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    mock_placement("CA1001").expect(1).mount(&provider).await;
    Mock::given(method("GET"))
        .and(path("/media/RE1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(b"ID3-fake-mp3-bytes".to_vec()),
        )
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/calls/recording-complete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let h = harness(&provider, &upstream, 10).await;
    let key = issue_key(&h.router).await;

    // Place the call.
    let (status, body) = post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({
            "phoneNumber": "+13128484329",
            "interactive": false,
            "storytellerId": "st-7",
            "question": "Tell me about your childhood."
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["twilioSid"], "CA1001");
    let call_id = body["callId"].as_str().unwrap().to_string();

    // Provider walks the lifecycle.
    for s in ["ringing", "in-progress"] {
        let status = post_form(
            &h.router,
            "/call-status",
            &[("CallSid", "CA1001"), ("CallStatus", s)],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Recording-ready callback; the pipeline fetches and notifies.
    let media_url = format!("{}/media/RE1", provider.uri());
    let status = post_form(
        &h.router,
        "/handle-recording",
        &[
            ("CallSid", "CA1001"),
            ("RecordingSid", "RE1"),
            ("RecordingUrl", &media_url),
            ("RecordingDuration", "42"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Terminal status with duration.
    let status = post_form(
        &h.router,
        "/call-status",
        &[
            ("CallSid", "CA1001"),
            ("CallStatus", "completed"),
            ("CallDuration", "42"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Wait for the async pipeline to deliver the notification.
    let mut delivered = Vec::new();
    for _ in 0..100 {
        delivered = upstream.received_requests().await.unwrap();
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(delivered.len(), 1, "exactly one upstream notification");

    // The posted body verifies against the shared secret.
    let request = &delivered[0];
    let payload: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(payload["callSid"], "CA1001");
    assert_eq!(payload["durationSeconds"], 42);
    assert!(payload["fileSize"].as_u64().unwrap() > 0);
    assert!(payload["filename"].as_str().unwrap().starts_with("story-"));
    assert_eq!(payload["storytellerId"], "st-7");

    let ts = request.headers["x-timestamp"].to_str().unwrap();
    let sig = request.headers["x-signature"].to_str().unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"shared-secret").unwrap();
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(&request.body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    assert_eq!(sig, expected);

    // A story file landed on disk with size > 0.
    let dir = h.state.config.storage.recordings_dir.clone();
    let mut found = false;
    for entry in std::fs::read_dir(&dir).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("story-") && name.ends_with(".mp3") {
            assert!(entry.metadata().unwrap().len() > 0);
            found = true;
        }
    }
    assert!(found, "expected a story-*.mp3 in {dir}");

    // The record reflects the full progression and the delivery.
    let (status, body) = get_json(&h.router, &format!("/calls/{call_id}"), Some(&key)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["call"]["status"], "completed");
    assert_eq!(body["call"]["durationSecs"], 42);
    assert!(body["call"]["recording"]["sizeBytes"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn rate_limit_returns_429_with_window() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    // Each placement needs a distinct SID for the registry's unique index.
    mock_placement("CA2001").up_to_n_times(1).mount(&provider).await;
    mock_placement("CA2002").up_to_n_times(1).mount(&provider).await;

    let h = harness(&provider, &upstream, 2).await;
    let key = issue_key(&h.router).await;

    for _ in 0..2 {
        let (status, _) = post_json(
            &h.router,
            "/call",
            Some(&key),
            json!({"phoneNumber": "+13128484329"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({"phoneNumber": "+13128484329"}),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["details"]["window"], "hour");
    assert!(body["retryAfter"].as_u64().unwrap() <= 3600);
}

#[tokio::test]
async fn recording_not_ready_retries_with_backoff_then_succeeds() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    mock_placement("CA7001").mount(&provider).await;
    // Media 404s twice (not yet available), then lands on the third GET.
    Mock::given(method("GET"))
        .and(path("/media/RE7"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .expect(2)
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/RE7"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"late-audio".to_vec()))
        .expect(1)
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/calls/recording-complete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let h = harness(&provider, &upstream, 10).await;
    let key = issue_key(&h.router).await;
    post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({"phoneNumber": "+13128484329"}),
    )
    .await;

    let media_url = format!("{}/media/RE7", provider.uri());
    post_form(
        &h.router,
        "/handle-recording",
        &[
            ("CallSid", "CA7001"),
            ("RecordingSid", "RE7"),
            ("RecordingUrl", &media_url),
            ("RecordingDuration", "12"),
        ],
    )
    .await;

    // The backoff runs ~2s then ~4s before the third attempt succeeds;
    // exactly one notification follows.
    let mut delivered = Vec::new();
    for _ in 0..200 {
        delivered = upstream.received_requests().await.unwrap();
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(delivered.len(), 1);

    let record = h.state.registry.get_by_provider_sid("CA7001").unwrap();
    let recording = record.recording.unwrap();
    assert_eq!(recording.size_bytes, "late-audio".len() as u64);
}

#[tokio::test]
async fn upstream_403_is_not_retried_and_recorded() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    mock_placement("CA3001").mount(&provider).await;
    Mock::given(method("GET"))
        .and(path("/media/RE3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/calls/recording-complete"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&upstream)
        .await;

    let h = harness(&provider, &upstream, 10).await;
    let key = issue_key(&h.router).await;

    let (status, body) = post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({"phoneNumber": "+13128484329"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let call_id = body["callId"].as_str().unwrap().to_string();

    let media_url = format!("{}/media/RE3", provider.uri());
    post_form(
        &h.router,
        "/handle-recording",
        &[
            ("CallSid", "CA3001"),
            ("RecordingSid", "RE3"),
            ("RecordingUrl", &media_url),
            ("RecordingDuration", "10"),
        ],
    )
    .await;

    // Exactly one POST (no retries on 4xx); notified stays false.
    for _ in 0..100 {
        if !upstream.received_requests().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.received_requests().await.unwrap().len(), 1);

    let record = h.state.registry.get_by_internal_id(&call_id).unwrap();
    assert!(record.recording.is_some());
    assert!(!record.notified);
}

#[tokio::test]
async fn unknown_status_values_and_missing_sids_are_acked() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    let h = harness(&provider, &upstream, 10).await;

    // The provider must always get a 2xx, whatever it sends.
    assert_eq!(
        post_form(&h.router, "/call-status", &[("CallStatus", "ringing")]).await,
        StatusCode::OK
    );
    assert_eq!(
        post_form(
            &h.router,
            "/call-status",
            &[("CallSid", "CA-unknown"), ("CallStatus", "warbling")]
        )
        .await,
        StatusCode::OK
    );
    assert_eq!(
        post_form(&h.router, "/handle-recording", &[("CallSid", "CA9")]).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn voice_webhook_serves_question_markup() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    mock_placement("CA4001").mount(&provider).await;

    let h = harness(&provider, &upstream, 10).await;
    let key = issue_key(&h.router).await;
    post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({"phoneNumber": "+13128484329", "question": "What was your wedding day like?"}),
    )
    .await;

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/voice")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("CallSid=CA4001"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "application/xml"
    );
    let xml = String::from_utf8(
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();
    assert!(xml.contains("What was your wedding day like?"));
    assert!(xml.contains("<Record"));
    assert!(xml.contains("handle-recording"));
}

#[tokio::test]
async fn recordings_listing_requires_key() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    let h = harness(&provider, &upstream, 10).await;

    let (status, _) = get_json(&h.router, "/recordings", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let key = issue_key(&h.router).await;
    let (status, body) = get_json(&h.router, "/recordings", Some(&key)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    // Traversal attempts read as absent.
    let (status, _) = get_json(&h.router, "/recordings/..%2Fsecrets.mp3", Some(&key)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_hangs_up_and_conflicts_when_terminal() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    mock_placement("CA6001").mount(&provider).await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls/CA6001.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sid": "CA6001", "status": "completed"
        })))
        .expect(1)
        .mount(&provider)
        .await;

    let h = harness(&provider, &upstream, 10).await;
    let key = issue_key(&h.router).await;
    let (_, body) = post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({"phoneNumber": "+13128484329"}),
    )
    .await;
    let call_id = body["callId"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &h.router,
        &format!("/calls/{call_id}/cancel"),
        Some(&key),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["call"]["status"], "canceled");
    assert_eq!(body["providerHangupConfirmed"], true);

    // Canceling a terminal call is an illegal transition the client sees.
    let (status, body) = post_json(
        &h.router,
        &format!("/calls/{call_id}/cancel"),
        Some(&key),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict_state");
}

#[tokio::test]
async fn cancel_reports_unconfirmed_hangup_when_provider_fails() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    mock_placement("CA6101").mount(&provider).await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls/CA6101.json"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&provider)
        .await;

    let h = harness(&provider, &upstream, 10).await;
    let key = issue_key(&h.router).await;
    let (_, body) = post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({"phoneNumber": "+13128484329"}),
    )
    .await;
    let call_id = body["callId"].as_str().unwrap().to_string();

    // The cancel itself still succeeds; only the hangup confirmation
    // reflects the provider failure.
    let (status, body) = post_json(
        &h.router,
        &format!("/calls/{call_id}/cancel"),
        Some(&key),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["call"]["status"], "canceled");
    assert_eq!(body["providerHangupConfirmed"], false);
}

#[tokio::test]
async fn stats_reports_usage_and_counts() {
    let provider = MockServer::start().await;
    let upstream = MockServer::start().await;
    mock_placement("CA5001").mount(&provider).await;

    let h = harness(&provider, &upstream, 10).await;
    let key = issue_key(&h.router).await;
    post_json(
        &h.router,
        "/call",
        Some(&key),
        json!({"phoneNumber": "+13128484329"}),
    )
    .await;

    let (status, body) = get_json(&h.router, "/stats", Some(&key)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["usage"]["hour"]["used"], 1);
    assert_eq!(body["usage"]["hour"]["limit"], 10);
    assert_eq!(body["calls"]["total"], 1);
}
