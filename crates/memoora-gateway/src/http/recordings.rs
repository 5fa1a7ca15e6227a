use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use memoora_credentials::types::Permission;

use crate::app::AppState;
use crate::auth::authenticate;
use crate::http::error::ApiError;

/// GET /recordings — names, sizes, and mtimes of stored recordings.
pub async fn list_recordings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers, Permission::Recordings)?;

    let dir = Path::new(&state.config.storage.recordings_dir);
    let mut recordings = Vec::new();
    if dir.is_dir() {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|_| ApiError::internal())?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("story-") || !name.ends_with(".mp3") {
                continue;
            }
            let meta = entry.metadata().await.map_err(|_| ApiError::internal())?;
            let modified = meta
                .modified()
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from)
                .map(|t| t.to_rfc3339());
            recordings.push(json!({
                "filename": name,
                "sizeBytes": meta.len(),
                "modifiedAt": modified,
            }));
        }
    }
    recordings.sort_by(|a, b| b["filename"].as_str().cmp(&a["filename"].as_str()));

    Ok(Json(json!({ "recordings": recordings, "count": recordings.len() })))
}

/// GET /recordings/:filename — stream one stored recording.
pub async fn get_recording(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers, Permission::Recordings)?;
    serve_mp3(&state.config.storage.recordings_dir, &filename, "story-").await
}

/// Read a single mp3 out of `dir`, refusing anything that is not a plain
/// `<prefix>*.mp3` file name (no separators, no traversal).
pub(crate) async fn serve_mp3(dir: &str, filename: &str, prefix: &str) -> Result<Response, ApiError> {
    if filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || !filename.starts_with(prefix)
        || !filename.ends_with(".mp3")
    {
        return Err(ApiError::not_found(format!("recording {filename}")));
    }

    let path = Path::new(dir).join(filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            [
                (header::CONTENT_TYPE, "audio/mpeg".to_string()),
                (header::CONTENT_LENGTH, bytes.len().to_string()),
            ],
            bytes,
        )
            .into_response()),
        Err(_) => Err(ApiError::not_found(format!("recording {filename}"))),
    }
}
