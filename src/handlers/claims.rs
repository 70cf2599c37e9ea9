//! Claim-related API handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::claims::{Claim, CreateClaimRequest, ListClaimsQuery, ResolveClaimRequest};
use crate::error::{ApiError, ApiResult};
use crate::escrow::ReleaseOutcome;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Response for a resolved claim
#[derive(Debug, Serialize)]
pub struct ResolveClaimResponse {
    pub claim: Claim,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseOutcome>,
}

/// File a claim against a booking
pub async fn create_claim(
    State(app_state): State<AppState>,
    Json(request): Json<CreateClaimRequest>,
) -> ApiResult<Json<ApiResponse<Claim>>> {
    let (claim, events) = app_state.claim_service.file_claim(request).await?;

    app_state.publish_events(&events).await;

    Ok(Json(ApiResponse::ok(claim)))
}

/// List claims with filtering and pagination
pub async fn list_claims(
    State(app_state): State<AppState>,
    Query(query): Query<ListClaimsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Claim>>>> {
    let claims = app_state.claim_service.list_claims(query).await?;

    Ok(Json(ApiResponse::ok(claims)))
}

/// Get a single claim by ID
pub async fn get_claim(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Claim>>> {
    let claim = app_state
        .claim_service
        .get_claim(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Claim {} not found", id)))?;

    Ok(Json(ApiResponse::ok(claim)))
}

/// Move a pending claim to under_review (no fund movement)
pub async fn review_claim(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Claim>>> {
    let (claim, events) = app_state.claim_service.review_claim(&id).await?;

    app_state.publish_events(&events).await;

    Ok(Json(ApiResponse::ok(claim)))
}

/// Record an admin decision on a claim and trigger the escrow release
///
/// The decision is persisted even when the fund movement fails; in that
/// case the response is an error naming both facts so the admin is never
/// silently left with unmoved funds.
pub async fn resolve_claim(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveClaimRequest>,
) -> ApiResult<Json<ApiResponse<ResolveClaimResponse>>> {
    let resolution = app_state.claim_service.resolve_claim(&id, request).await?;

    app_state.publish_events(&resolution.events).await;

    match resolution.release {
        Ok(outcome) => Ok(Json(ApiResponse::ok(ResolveClaimResponse {
            claim: resolution.claim,
            release: Some(outcome),
        }))),
        Err(release_err) => Err(decision_recorded_error(release_err)),
    }
}

/// Wrap a release failure so the response states the decision still stands
fn decision_recorded_error(err: ApiError) -> ApiError {
    const PREFIX: &str = "Claim decision was recorded, but funds were not moved";

    match err {
        ApiError::GatewayError { details } => ApiError::GatewayError {
            details: format!("{}: {}", PREFIX, details),
        },
        ApiError::BadRequest(m) => ApiError::BadRequest(format!("{}: {}", PREFIX, m)),
        ApiError::NotFound(m) => ApiError::BadRequest(format!("{}: {}", PREFIX, m)),
        other => ApiError::InternalError(format!("{}: {}", PREFIX, other)),
    }
}
