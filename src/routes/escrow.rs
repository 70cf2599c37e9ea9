//! Escrow route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{get_escrow, get_payout_account, release_escrow};
use crate::state::AppState;

pub fn escrow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/escrow/release", post(release_escrow))
        .route("/api/escrow/:booking_id", get(get_escrow))
        .route("/api/payout-accounts/:user_id", get(get_payout_account))
}
