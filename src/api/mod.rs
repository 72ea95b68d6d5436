pub mod chat;
pub mod rate;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer;
use crate::state::AppState;

/// `/chat` and `/rate`, behind the bearer-token layer when auth is enabled, plus `/health`.
pub fn router(state: AppState) -> Router {
    let mut protected: Router<AppState> = Router::new()
        .route("/chat", post(chat::chat))
        .route("/rate", post(rate::rate));

    if let Some(validator) = state.validator.clone() {
        protected = protected.route_layer(middleware::from_fn_with_state(validator, require_bearer));
    }

    Router::new()
        .merge(protected)
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
