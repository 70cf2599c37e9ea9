//! Payment gateway webhook endpoint
//!
//! The raw body is verified against the signature header before any parsing
//! or persistence. An invalid signature is a 400 with no side effects; a
//! processing failure is a non-2xx so the gateway's retry policy redelivers
//! the event.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::stripe::webhook::{verify_and_parse, SIGNATURE_HEADER};

pub async fn stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing webhook signature header".to_string()))?;

    let event = verify_and_parse(
        &body,
        signature,
        &app_state.config.stripe_webhook_secret,
        app_state.config.webhook_tolerance_seconds,
        Utc::now().timestamp(),
    )
    .map_err(|e| ApiError::BadRequest(format!("Webhook rejected: {}", e)))?;

    let events = app_state.reconciler.process(event).await.map_err(|e| {
        // Non-2xx: let the gateway redeliver. Handlers are idempotent, so a
        // partial first attempt is safe to replay.
        ApiError::InternalError(format!("Webhook processing failed: {:#}", e))
    })?;

    app_state.publish_events(&events).await;

    Ok(Json(json!({ "received": true })))
}
