//! Claim models and request DTOs

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Claim (dispute) model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Claim {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub claimant_id: Uuid,
    pub claim_type: String,
    pub description: String,
    pub amount_requested: Option<i64>,
    pub evidence_urls: Vec<String>,
    pub claim_status: ClaimStatus,
    pub resolved_by: Option<Uuid>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Claim status, forward-only: pending -> under_review -> approved/rejected
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "claim_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl ClaimStatus {
    /// Whether an admin decision may still be recorded
    pub fn is_open(&self) -> bool {
        matches!(self, ClaimStatus::Pending | ClaimStatus::UnderReview)
    }
}

/// Which party filed the claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimantRole {
    Owner,
    Renter,
}

/// Admin decision on a claim
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDecision {
    Approved,
    Rejected,
}

/// Request DTO for filing a claim
#[derive(Debug, Deserialize, Validate)]
pub struct CreateClaimRequest {
    pub booking_id: Uuid,
    pub claimant_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub claim_type: String,
    #[validate(length(min = 10, max = 4000))]
    pub description: String,
    #[validate(range(min = 0))]
    pub amount_requested: Option<i64>,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
}

/// Request DTO for resolving a claim
#[derive(Debug, Deserialize)]
pub struct ResolveClaimRequest {
    pub decision: ClaimDecision,
    pub resolved_by: Uuid,
    pub resolution_notes: Option<String>,
}

/// Query parameters for listing claims
#[derive(Debug, Deserialize)]
pub struct ListClaimsQuery {
    pub status: Option<ClaimStatus>,
    pub booking_id: Option<Uuid>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}
