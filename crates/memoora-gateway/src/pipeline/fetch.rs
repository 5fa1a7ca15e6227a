use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use memoora_telephony::TelephonyError;

use crate::app::AppState;

/// First retry delay after a media 404; doubles per attempt.
const NOT_READY_BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct StoredRecording {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_secs: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("recording still unavailable after {0} attempts")]
    NeverBecameAvailable(u32),

    #[error("provider error: {0}")]
    Telephony(#[from] TelephonyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("downloaded recording is empty")]
    EmptyRecording,
}

/// Authenticated download with bounded not-ready retries.
///
/// Streams into a dot-prefixed temp file and renames into place only once
/// the byte count is known good, so no reader ever observes a partial or
/// empty file under the final name, and nothing is ever overwritten.
pub async fn fetch_recording(
    state: &AppState,
    media_url: &str,
    duration_secs: Option<u32>,
) -> Result<StoredRecording, FetchError> {
    let mut delay = NOT_READY_BASE_DELAY;
    let mut attempt = 0;
    let mut response = loop {
        attempt += 1;
        match state.telephony.download_recording(media_url).await {
            Ok(resp) => break resp,
            Err(TelephonyError::MediaNotReady) if attempt < MAX_ATTEMPTS => {
                info!(attempt, delay_secs = delay.as_secs(), "recording not ready; backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(TelephonyError::MediaNotReady) => {
                return Err(FetchError::NeverBecameAvailable(attempt));
            }
            Err(e) => return Err(e.into()),
        }
    };

    let recordings_dir = Path::new(&state.config.storage.recordings_dir);
    tokio::fs::create_dir_all(recordings_dir).await?;

    let temp_path = recordings_dir.join(format!(".download-{}", Uuid::new_v4()));
    let mut size_bytes: u64 = 0;
    {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    size_bytes += chunk.len() as u64;
                    file.write_all(&chunk).await?;
                }
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(FetchError::Telephony(e.into()));
                }
            }
        }
        file.flush().await?;
    }

    if size_bytes == 0 {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(FetchError::EmptyRecording);
    }

    let (filename, final_path) = final_recording_path(state, recordings_dir).await?;
    tokio::fs::rename(&temp_path, &final_path).await?;
    info!(filename = %filename, size_bytes, "recording stored");

    Ok(StoredRecording {
        filename,
        path: final_path,
        size_bytes,
        duration_secs,
    })
}

/// `story-<unix_ms>.mp3`, nudged forward if a same-millisecond file exists.
async fn final_recording_path(
    state: &AppState,
    dir: &Path,
) -> Result<(String, PathBuf), FetchError> {
    let mut stamp = state.clock.unix_millis();
    loop {
        let filename = format!("story-{stamp}.mp3");
        let path = dir.join(&filename);
        match tokio::fs::try_exists(&path).await {
            Ok(false) => return Ok((filename, path)),
            Ok(true) => stamp += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
