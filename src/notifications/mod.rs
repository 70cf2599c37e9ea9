//! Notification dispatcher
//!
//! Consumes domain events from the escrow core and writes user-facing
//! notification rows. Delivery (push, email) is a separate subsystem; this
//! module only records what should be delivered. Dispatch failures are
//! logged and swallowed: the money already moved, and a presentation
//! failure must never cause the caller to retry a financial operation.

use sqlx::PgPool;
use uuid::Uuid;

use crate::escrow::DomainEvent;

/// Turns domain events into notification rows
pub struct Notifier {
    db_pool: PgPool,
}

impl Notifier {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Record notifications for each event. Errors are logged, not returned.
    pub async fn dispatch(&self, events: &[DomainEvent]) {
        for event in events {
            if let Err(e) = self.dispatch_one(event).await {
                tracing::error!(error = %e, event = ?event, "Failed to record notification");
            }
        }
    }

    async fn dispatch_one(&self, event: &DomainEvent) -> Result<(), sqlx::Error> {
        let (user_id, kind, title, body, booking_id) = match event {
            DomainEvent::RentalReleased {
                booking_id,
                owner_id,
                amount,
            } => (
                *owner_id,
                "rental_released",
                "Rental payment released".to_string(),
                format!("The rental payment of {} has been transferred to your account.", fmt_amount(*amount)),
                Some(*booking_id),
            ),
            DomainEvent::DepositReturned {
                booking_id,
                renter_id,
                amount,
            } => (
                *renter_id,
                "deposit_returned",
                "Deposit returned".to_string(),
                format!("Your deposit of {} has been refunded.", fmt_amount(*amount)),
                Some(*booking_id),
            ),
            DomainEvent::DepositForfeited {
                booking_id,
                owner_id,
                amount,
            } => (
                *owner_id,
                "deposit_forfeited",
                "Deposit awarded".to_string(),
                format!("The deposit of {} has been transferred to your account.", fmt_amount(*amount)),
                Some(*booking_id),
            ),
            DomainEvent::EscrowRefunded {
                booking_id,
                renter_id,
                amount,
            } => (
                *renter_id,
                "escrow_refunded",
                "Payment refunded".to_string(),
                format!("A refund of {} has been issued to your payment method.", fmt_amount(*amount)),
                Some(*booking_id),
            ),
            DomainEvent::ClaimFiled {
                claim_id: _,
                booking_id,
                claimant_id,
            } => (
                *claimant_id,
                "claim_filed",
                "Claim received".to_string(),
                "Your claim has been received and will be reviewed.".to_string(),
                Some(*booking_id),
            ),
            // Held/released/failed and claim status changes go out over the
            // WebSocket broadcast; no notification row.
            DomainEvent::EscrowHeld { .. }
            | DomainEvent::EscrowReleased { .. }
            | DomainEvent::PaymentFailed { .. }
            | DomainEvent::ClaimStatusChanged { .. } => return Ok(()),
        };

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, body, booking_id, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(booking_id)
        .bind(chrono::Utc::now())
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

/// Format a minor-unit amount for display
fn fmt_amount(minor_units: i64) -> String {
    format!("${}.{:02}", minor_units / 100, (minor_units % 100).abs())
}
