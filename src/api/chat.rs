use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::llm::prompt::{sanitize_for_prompt, truncate_chars};
use crate::models::{ChatRequest, ChatResponse};
use crate::state::AppState;

/// POST /chat: answer one utterance from the two document indexes.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    // ── Step 1: Validate and sanitize input ───────────────
    let Json(req) = payload?;
    let dialog = req.dialog.trim();
    if dialog.is_empty() {
        return Err(AppError::BadRequest("Dialog is required".to_string()));
    }
    let dialog = sanitize_for_prompt(&truncate_chars(
        dialog,
        state.config.limits.max_dialog_chars,
    ));

    // ── Step 2: Acquire semaphore ─────────────────────────
    let _permit = state
        .chat_semaphore
        .clone()
        .try_acquire_owned()
        .map_err(|_| AppError::Busy)?;

    // ── Step 3: Retrieve, merge, route under the deadline ─
    let outcome = tokio::time::timeout(state.request_timeout(), state.conversation.run(&dialog))
        .await
        .map_err(|_| AppError::Timeout)??;

    tracing::info!(
        "Answered dialog {} via {:?} with {} documents",
        req.dialog_id.as_deref().unwrap_or("-"),
        outcome.answer.route,
        outcome.context.len()
    );
    Ok(Json(outcome.into_response()))
}
