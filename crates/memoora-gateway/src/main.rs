use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use memoora_ai::{OpenAiReasoning, OpenAiRecognition, OpenAiSynthesis};
use memoora_core::clock::{Clock, SystemClock};
use memoora_core::config::MemooraConfig;
use memoora_credentials::types::RateLimits;
use memoora_credentials::CredentialStore;
use memoora_dialog::{ConversationFlow, DialogEngine};
use memoora_notify::publisher::{spawn_publisher, RetryPolicy};
use memoora_registry::CallRegistry;
use memoora_telephony::{TelephonyAdapter, TelephonyClient};

use memoora_gateway::{app, sweeper};

#[derive(Parser, Debug)]
#[command(name = "memoora-gateway", about = "Outbound voice-call orchestration service")]
struct Args {
    /// Path to the TOML config file (default: memoora.toml, plus
    /// MEMOORA_* env overrides).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memoora_gateway=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    // A bad or incomplete config aborts startup with a non-zero exit.
    let config = MemooraConfig::load(args.config.as_deref()).map_err(|e| {
        error!("configuration error: {e}");
        anyhow::anyhow!(e)
    })?;
    let zone = config.zone().map_err(|e| {
        error!("configuration error: {e}");
        anyhow::anyhow!(e)
    })?;

    std::fs::create_dir_all(&config.storage.recordings_dir)?;
    std::fs::create_dir_all(&config.storage.temp_dir)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let flow = Arc::new(
        ConversationFlow::load(std::path::Path::new(&config.dialog.questions_path)).map_err(
            |e| {
                error!("questions file error: {e}");
                anyhow::anyhow!(e)
            },
        )?,
    );

    let credentials = CredentialStore::new(
        Connection::open(&config.database.path)?,
        clock.clone(),
        zone,
        config.signup.clone(),
        RateLimits {
            per_hour: config.limits.calls_per_hour,
            per_day: config.limits.calls_per_day,
            per_month: config.limits.calls_per_month,
        },
    )?;
    // Separate connection so registry writes never contend with
    // credential lookups on the same handle.
    let registry = CallRegistry::new(Connection::open(&config.database.path)?, clock.clone())?;

    let dialog = DialogEngine::new(flow, clock.clone(), config.limits.max_call_secs);

    let telephony = TelephonyAdapter::new(
        TelephonyClient::new(
            &config.telephony.account_sid,
            &config.telephony.auth_token,
            &config.telephony.base_url,
        ),
        config.telephony.caller.clone(),
    );

    let (synthesis, recognition, reasoning) = match &config.ai.openai {
        Some(openai) => (
            Some(Arc::new(OpenAiSynthesis::new(openai)) as Arc<dyn memoora_ai::Synthesis>),
            Some(Arc::new(OpenAiRecognition::new(openai)) as Arc<dyn memoora_ai::Recognition>),
            Some(Arc::new(OpenAiReasoning::new(openai)) as Arc<dyn memoora_ai::Reasoning>),
        ),
        None => {
            warn!("no AI provider configured; interactive calls degrade to static flow");
            (None, None, None)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (outcome_tx, mut outcome_rx) = mpsc::channel(64);
    let notifier = spawn_publisher(
        config.upstream.clone(),
        RetryPolicy::default(),
        clock.clone(),
        outcome_tx,
        shutdown_rx.clone(),
    );

    let state = Arc::new(app::AppState::new(
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
    ));

    // Record delivery outcomes on the call registry.
    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(outcome) = outcome_rx.recv().await {
                if let Err(e) = state
                    .registry
                    .mark_notified(&outcome.call_sid, outcome.delivered)
                {
                    warn!(provider_sid = %outcome.call_sid, error = %e, "could not record delivery outcome");
                }
            }
        });
    }

    tokio::spawn(sweeper::run(state.clone(), shutdown_rx));

    let bind = state.config.server.bind.clone();
    let port = state.config.server.port;
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("Memoora gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
