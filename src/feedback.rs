//! Thumbs-up / thumbs-down feedback, appended to the ratings index.

use anyhow::Result;
use serde::Serialize;

use crate::models::{RateRequest, RateResponse};
use crate::search::{DocumentSearch, NewEntry};

pub const THUMBS_UP: &str = "rating:thumbs-up";
pub const THUMBS_DOWN: &str = "rating:thumbs-down";
pub const NO_RATING: &str = "rating:none";

pub fn rating_label(rating: Option<bool>) -> &'static str {
    match rating {
        Some(true) => THUMBS_UP,
        Some(false) => THUMBS_DOWN,
        None => NO_RATING,
    }
}

/// Metadata stored next to the rated question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingRecord {
    pub response: String,
    pub label: &'static str,
    pub dialog_id: String,
}

impl RatingRecord {
    pub fn entry(request: &RateRequest) -> Result<NewEntry> {
        let record = RatingRecord {
            response: request.response.clone(),
            label: rating_label(request.rating),
            dialog_id: request.dialog_id.clone(),
        };
        Ok(NewEntry {
            content: request.request.clone(),
            metadata: serde_json::to_value(record)?,
        })
    }
}

/// Append one rating. Repeated ratings for the same dialog are separate entries.
pub async fn record_rating(
    search: &dyn DocumentSearch,
    ratings_index: &str,
    request: RateRequest,
) -> Result<RateResponse> {
    let entry = RatingRecord::entry(&request)?;
    let output = search.add_texts(ratings_index, vec![entry]).await?;
    tracing::info!(
        "Recorded {} for dialog {}",
        rating_label(request.rating),
        request.dialog_id
    );
    Ok(RateResponse {
        dialog_id: request.dialog_id,
        output,
    })
}
