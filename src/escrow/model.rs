//! Escrow ledger models and release DTOs

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Escrow transaction model (one row per paid booking)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub rental_amount: i64,
    pub deposit_amount: i64,
    pub platform_fee: i64,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub rental_transfer_id: Option<String>,
    pub deposit_refund_id: Option<String>,
    pub transfer_id: Option<String>,
    pub escrow_status: EscrowStatus,
    pub held_until: Option<DateTime<Utc>>,
    pub rental_released_at: Option<DateTime<Utc>>,
    pub deposit_returned_at: Option<DateTime<Utc>>,
    pub release_date: Option<DateTime<Utc>>,
    pub refund_amount: Option<i64>,
    pub refund_reason: Option<String>,
    pub transfer_failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Escrow lifecycle status
///
/// `pending -> held -> {released | refunded | transfer_failed | failed}`.
/// `held` is the only state from which funds move; `transfer_failed` records
/// a deterministic gateway rejection and can be retried once the cause is
/// fixed (e.g. the owner finishes payout onboarding).
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "escrow_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Held,
    Released,
    Refunded,
    TransferFailed,
    Failed,
}

impl EscrowStatus {
    /// Whether a release may be attempted from this state
    pub fn is_releasable(&self) -> bool {
        matches!(self, EscrowStatus::Held | EscrowStatus::TransferFailed)
    }
}

/// Reason a release was requested, determining where each leg goes
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    /// Owner confirmed the equipment came back: rental to owner, deposit to
    /// renter
    ReturnConfirmed,
    /// Rental leg already settled earlier; return the deposit
    Completed,
    /// Owner's claim approved: rental and deposit both to the owner
    ClaimOwner,
    /// Owner's claim rejected: rental to owner, deposit back to renter
    ClaimDenied,
    /// Renter's claim approved: everything back to the renter
    ClaimRenterApproved,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::ReturnConfirmed => "return_confirmed",
            ReleaseType::Completed => "completed",
            ReleaseType::ClaimOwner => "claim_owner",
            ReleaseType::ClaimDenied => "claim_denied",
            ReleaseType::ClaimRenterApproved => "claim_renter_approved",
        }
    }
}

/// Request body for the release endpoint
#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub booking_id: Uuid,
    pub release_type: ReleaseType,
    /// Route the deposit leg to the owner instead of the renter (damage
    /// deduction agreed at hand-back). Only meaningful for
    /// `return_confirmed` and `completed`.
    #[serde(default)]
    pub deposit_to_owner: bool,
}

/// Result of a release call
#[derive(Debug, Serialize)]
pub struct ReleaseOutcome {
    pub success: bool,
    pub booking_id: Uuid,
    pub release_type: ReleaseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    pub message: String,
}
