use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Synthesized prompt audio older than this has been played (or never will
/// be) and can go.
const TEMP_AUDIO_TTL_SECS: u64 = 15 * 60;

/// Maintenance loop: expires buffered provider callbacks, discards idle
/// conversations, and deletes stale synthesized audio. Runs until shutdown
/// broadcasts `true`.
pub async fn run(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    info!("maintenance sweeper started");
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick(&state).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("maintenance sweeper shutting down");
                    break;
                }
            }
        }
    }
}

async fn tick(state: &Arc<AppState>) {
    let dropped = state.registry.sweep_pending();
    if dropped > 0 {
        debug!(dropped, "expired buffered callbacks");
    }

    let idle_ttl = chrono::Duration::hours(state.config.dialog.idle_ttl_hours as i64);
    let swept = state.dialog.sweep_idle(idle_ttl);
    if swept > 0 {
        debug!(swept, "idle conversations discarded");
    }

    sweep_temp_audio(Path::new(&state.config.storage.temp_dir)).await;
}

async fn sweep_temp_audio(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    let now = std::time::SystemTime::now();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("question_") || !name.ends_with(".mp3") {
            continue;
        }
        let stale = entry
            .metadata()
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age.as_secs() > TEMP_AUDIO_TTL_SECS);
        if stale {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!(file = %name, error = %e, "could not delete stale prompt audio");
            } else {
                debug!(file = %name, "stale prompt audio deleted");
            }
        }
    }
}
