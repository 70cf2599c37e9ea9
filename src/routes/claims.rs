//! Claim route definitions

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::{create_claim, get_claim, list_claims, resolve_claim, review_claim};
use crate::state::AppState;

pub fn claim_routes() -> Router<AppState> {
    Router::new()
        .route("/api/claims", post(create_claim))
        .route("/api/claims", get(list_claims))
        .route("/api/claims/:id", get(get_claim))
        .route("/api/claims/:id/review", put(review_claim))
        .route("/api/claims/:id/resolve", put(resolve_claim))
}
