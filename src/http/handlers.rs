//! HTTP request handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::state::AppState;
use crate::error::{ExtractError, FailureKind};
use crate::host::{confine_output, run_command, ExtractCommand, ExtractReply};

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    InputNotFound(String),
    NoAudioTrack(String),
    OutputNotAllowed(String),
    Busy,
    InternalError { message: String, kind: FailureKind },
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, error, kind) = match self {
            HttpError::InputNotFound(msg) => (StatusCode::NOT_FOUND, msg, kind_name(FailureKind::NotFound)),
            HttpError::NoAudioTrack(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                kind_name(FailureKind::NoAudioTrack),
            ),
            HttpError::OutputNotAllowed(msg) => (
                StatusCode::FORBIDDEN,
                msg,
                kind_name(FailureKind::OutputNotAllowed),
            ),
            HttpError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many extractions in progress".to_string(),
                "busy".to_string(),
            ),
            HttpError::InternalError { message, kind } => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, kind_name(kind))
            }
        };

        (status, Json(ErrorBody { error, kind })).into_response()
    }
}

impl From<ExtractError> for HttpError {
    fn from(err: ExtractError) -> Self {
        match err.kind() {
            FailureKind::NotFound => HttpError::InputNotFound(err.to_string()),
            FailureKind::NoAudioTrack => HttpError::NoAudioTrack(err.to_string()),
            FailureKind::OutputNotAllowed => HttpError::OutputNotAllowed(err.to_string()),
            kind => HttpError::InternalError {
                message: err.to_string(),
                kind,
            },
        }
    }
}

fn kind_name(kind: FailureKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("audio-extract v", env!("CARGO_PKG_VERSION"))
}

/// Extraction endpoint
/// POST /extract
///
/// Outputs always land in the scratch directory.
pub async fn extract(
    State(state): State<Arc<AppState>>,
    Json(mut command): Json<ExtractCommand>,
) -> Result<Json<ExtractReply>, HttpError> {
    let scratch_dir = state.config.extractor.scratch_dir();
    command.output_path = Some(confine_output(&scratch_dir, command.output_path.as_deref())?);

    let Some(_permit) = state.try_acquire() else {
        tracing::warn!(path = %command.path, "Rejecting extraction, all workers busy");
        return Err(HttpError::Busy);
    };

    let mut extractor = state.extractor()?;
    Ok(Json(run_command(&mut extractor, command).await?))
}
