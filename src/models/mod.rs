//! Shared data models for the RigShare escrow server

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// User model (minimal mirror of the marketplace user record)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Booking model
///
/// `rental_amount_released` and `deposit_returned` are the per-leg
/// idempotency flags: monotonic false-to-true, set at most once each.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Booking {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub owner_id: Uuid,
    pub renter_id: Uuid,
    pub rental_amount: i64,
    pub deposit_amount: i64,
    pub platform_fee: i64,
    pub total_amount: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub rental_amount_released: bool,
    pub deposit_returned: bool,
    pub escrow_release_date: Option<DateTime<Utc>>,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Booking lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Active,
    Returned,
    Completed,
    Cancelled,
    Disputed,
}

/// Payment status on a booking
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Connected payout account mirror (one row per owner onboarded with the
/// payment gateway)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PayoutAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_account_id: String,
    pub status: PayoutAccountStatus,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements_due: Option<serde_json::Value>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutAccount {
    /// Whether the gateway will accept transfers to this account
    pub fn is_transfer_ready(&self) -> bool {
        self.status == PayoutAccountStatus::Active
            && self.charges_enabled
            && self.payouts_enabled
    }
}

/// Normalized connected-account status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payout_account_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutAccountStatus {
    Active,
    Restricted,
    ConnectRequired,
}

/// Notification row written by the event dispatcher
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub booking_id: Option<Uuid>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}
