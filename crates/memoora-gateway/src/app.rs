use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use memoora_ai::{Reasoning, Recognition, Synthesis};
use memoora_core::clock::Clock;
use memoora_core::config::MemooraConfig;
use memoora_credentials::CredentialStore;
use memoora_dialog::DialogEngine;
use memoora_notify::PublisherHandle;
use memoora_registry::CallRegistry;
use memoora_telephony::TelephonyAdapter;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: MemooraConfig,
    pub clock: Arc<dyn Clock>,
    pub credentials: CredentialStore,
    pub registry: CallRegistry,
    pub dialog: DialogEngine,
    pub telephony: TelephonyAdapter,
    pub synthesis: Option<Arc<dyn Synthesis>>,
    pub recognition: Option<Arc<dyn Recognition>>,
    pub reasoning: Option<Arc<dyn Reasoning>>,
    pub notifier: PublisherHandle,
    /// Bounds concurrent turn-pipeline tasks. When exhausted, new call
    /// placements are rejected and webhook handlers degrade to the basic
    /// script path.
    pub turn_permits: Arc<Semaphore>,
    /// provider_sid -> temp filename of the pre-rendered next prompt.
    pub prompt_audio: DashMap<String, String>,
    /// provider_sid -> consecutive degraded turns (recognition/reasoning
    /// failures). Two in a row closes the call politely.
    pub turn_failures: DashMap<String, u32>,
    /// provider_sid -> cancellation for the in-flight turn task.
    pub active_turns: DashMap<String, CancellationToken>,
    /// provider_sid set once a completion notification has been enqueued,
    /// so the close path and the status callback cannot double-send.
    pub notify_enqueued: DashMap<String, ()>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MemooraConfig,
        clock: Arc<dyn Clock>,
        credentials: CredentialStore,
        registry: CallRegistry,
        dialog: DialogEngine,
        telephony: TelephonyAdapter,
        synthesis: Option<Arc<dyn Synthesis>>,
        recognition: Option<Arc<dyn Recognition>>,
        reasoning: Option<Arc<dyn Reasoning>>,
        notifier: PublisherHandle,
    ) -> Self {
        let turn_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_turns));
        Self {
            config,
            clock,
            credentials,
            registry,
            dialog,
            telephony,
            synthesis,
            recognition,
            reasoning,
            notifier,
            turn_permits,
            prompt_audio: DashMap::new(),
            turn_failures: DashMap::new(),
            active_turns: DashMap::new(),
            notify_enqueued: DashMap::new(),
        }
    }

    /// Absolute URL under the public base, for provider-facing callbacks.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.config.server.public_base_url.trim_end_matches('/'),
            path
        )
    }

    /// Discard all per-call bookkeeping once a call is over.
    pub fn forget_call(&self, provider_sid: &str) {
        self.dialog.end(provider_sid);
        self.prompt_audio.remove(provider_sid);
        self.turn_failures.remove(provider_sid);
        if let Some((_, token)) = self.active_turns.remove(provider_sid) {
            token.cancel();
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // client-facing API
        .route("/generate-api-key", post(crate::http::keys::generate_api_key))
        .route("/call", post(crate::http::calls::place_call))
        .route("/calls", get(crate::http::calls::list_calls))
        .route("/calls/{id}", get(crate::http::calls::get_call))
        .route("/calls/{id}/cancel", post(crate::http::calls::cancel_call))
        .route("/recordings", get(crate::http::recordings::list_recordings))
        .route(
            "/recordings/{filename}",
            get(crate::http::recordings::get_recording),
        )
        .route("/stats", get(crate::http::stats::stats_handler))
        .route("/health", get(crate::http::health::health_handler))
        // provider-facing webhooks
        .route("/voice", post(crate::http::voice::voice_handler))
        .route(
            "/voice-interactive",
            post(crate::http::voice::voice_interactive_handler),
        )
        .route("/call-status", post(crate::http::status::call_status_handler))
        .route(
            "/handle-recording",
            post(crate::http::recording::handle_recording),
        )
        // short-lived synthesized prompt audio
        .route("/audio/{filename}", get(crate::http::audio::get_audio))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
