use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Response,
};

use crate::app::AppState;
use crate::http::error::ApiError;
use crate::http::recordings::serve_mp3;

/// GET /audio/:filename — short-lived synthesized prompt audio, referenced
/// from `<Play>` markup. Unauthenticated by design: the provider's media
/// fetcher presents no credentials, and the names are unguessable
/// (SID + timestamp). The sweeper deletes files shortly after use.
pub async fn get_audio(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    serve_mp3(&state.config.storage.temp_dir, &filename, "question_").await
}
