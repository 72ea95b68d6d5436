use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::feedback::record_rating;
use crate::models::{RateRequest, RateResponse};
use crate::state::AppState;

/// POST /rate: append user feedback to the ratings index.
pub async fn rate(
    State(state): State<AppState>,
    payload: Result<Json<RateRequest>, JsonRejection>,
) -> Result<Json<RateResponse>, AppError> {
    let Json(req) = payload?;
    if req.dialog_id.trim().is_empty() {
        return Err(AppError::BadRequest("dialog_id is required".to_string()));
    }
    let response = tokio::time::timeout(
        state.request_timeout(),
        record_rating(
            state.search.as_ref(),
            &state.config.retrieval.ratings_index_name,
            req,
        ),
    )
    .await
    .map_err(|_| AppError::Timeout)?
    .map_err(AppError::Retrieval)?;
    Ok(Json(response))
}
