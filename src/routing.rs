//! Application router configuration.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::json;

use crate::{
    AppState,
    categorization::{
        accept_candidate_endpoint, categorize_endpoint, correct_category_endpoint,
        enqueue_categorization_endpoint, get_pending_candidates_endpoint,
        reject_candidate_endpoint,
    },
    endpoints,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(get_health))
        .route(endpoints::CATEGORIZE, post(categorize_endpoint))
        .route(
            endpoints::CATEGORIZE_BACKGROUND,
            post(enqueue_categorization_endpoint),
        )
        .route(
            endpoints::USER_CANDIDATES,
            get(get_pending_candidates_endpoint),
        )
        .route(endpoints::ACCEPT_CANDIDATE, post(accept_candidate_endpoint))
        .route(endpoints::REJECT_CANDIDATE, post(reject_candidate_endpoint))
        .route(
            endpoints::TRANSACTION_CATEGORY,
            put(correct_category_endpoint),
        )
        .fallback(get_404_not_found)
        .with_state(state)
}

async fn get_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_404_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "no route matches the requested path" })),
    )
        .into_response()
}
