//! Webhook route definitions

use axum::{routing::post, Router};

use crate::handlers::stripe_webhook;
use crate::state::AppState;

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/api/stripe/webhook", post(stripe_webhook))
}
