use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::conversation::ChatError;

/// Errors surfaced by the HTTP handlers.
///
/// Upstream failures are logged in full and reported to callers with an opaque message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Document retrieval failed")]
    Retrieval(#[source] anyhow::Error),
    #[error("Model invocation failed")]
    ModelInvocation(#[source] anyhow::Error),
    #[error("Citation resolution failed")]
    CitationResolution(#[source] anyhow::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Chat service at capacity")]
    Busy,
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(e) => e.status(),
            AppError::Retrieval(_)
            | AppError::ModelInvocation(_)
            | AppError::CitationResolution(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidQuestion(msg) => AppError::BadRequest(msg),
            ChatError::Retrieval(e) => AppError::Retrieval(e),
            ChatError::CitationResolution(e) => AppError::CitationResolution(e),
            ChatError::ModelInvocation(e) => AppError::ModelInvocation(e),
        }
    }
}

/// Malformed or missing request bodies keep the JSON error shape.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::Retrieval(e)
            | AppError::ModelInvocation(e)
            | AppError::CitationResolution(e)
            | AppError::Internal(e) => tracing::error!("{self}: {e:#}"),
            AppError::Auth(e) => tracing::debug!("Rejected request: {e}"),
            _ => tracing::warn!("{self}"),
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
