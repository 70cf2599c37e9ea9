//! Escrow-related API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::escrow::{EscrowTransaction, ReleaseOutcome, ReleaseRequest};
use crate::models::{ApiResponse, PayoutAccount};
use crate::state::AppState;

/// Release escrowed funds for a booking
///
/// Invoked by the admin UI or by the claim-resolution workflow; the caller
/// is trusted, so errors come back structured rather than as blanket 500s.
pub async fn release_escrow(
    State(app_state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> ApiResult<Json<ReleaseOutcome>> {
    let (outcome, events) = app_state
        .escrow_service
        .release(
            request.booking_id,
            request.release_type,
            request.deposit_to_owner,
        )
        .await?;

    app_state.publish_events(&events).await;

    Ok(Json(outcome))
}

/// Get the escrow ledger row for a booking
pub async fn get_escrow(
    State(app_state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<EscrowTransaction>>> {
    let escrow = app_state
        .escrow_service
        .get_escrow(&booking_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No escrow transaction for booking {}", booking_id))
        })?;

    Ok(Json(ApiResponse::ok(escrow)))
}

/// Get the connected payout account mirror for a user
pub async fn get_payout_account(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<PayoutAccount>>> {
    let account = app_state
        .escrow_service
        .get_payout_account(&user_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No payout account for user {}", user_id))
        })?;

    Ok(Json(ApiResponse::ok(account)))
}
