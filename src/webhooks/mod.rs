//! Webhook reconciliation
//!
//! Translates the gateway's asynchronous, possibly-duplicated, possibly
//! out-of-order event stream into idempotent updates of the booking and
//! escrow rows. Every handler is safe to re-run: updates are conditional,
//! inserts are upserts, and any failure propagates upward so the HTTP layer
//! answers non-2xx and the gateway redelivers.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::escrow::DomainEvent;
use crate::models::{Booking, PayoutAccountStatus, User};
use crate::stripe::{
    Account, Charge, CheckoutSession, PaymentGateway, PaymentIntent, StripeEvent, Transfer,
};

/// Normalize a connected account's capability flags into a local status
///
/// `active` when the gateway will both charge and pay out; `restricted` when
/// onboarding finished but requirements are outstanding; `connect_required`
/// while onboarding is incomplete.
pub fn normalize_account_status(
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
) -> PayoutAccountStatus {
    if charges_enabled && payouts_enabled {
        PayoutAccountStatus::Active
    } else if details_submitted {
        PayoutAccountStatus::Restricted
    } else {
        PayoutAccountStatus::ConnectRequired
    }
}

/// Webhook reconciler
pub struct WebhookReconciler {
    db_pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
}

impl WebhookReconciler {
    pub fn new(db_pool: PgPool, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db_pool, gateway }
    }

    /// Dispatch a verified event to its handler
    pub async fn process(&self, event: StripeEvent) -> Result<Vec<DomainEvent>> {
        tracing::info!(event_type = event.type_name(), "Processing webhook event");

        match event {
            StripeEvent::CheckoutSessionCompleted(session) => {
                self.handle_checkout_completed(session).await
            }
            StripeEvent::CheckoutSessionExpired(session) => {
                self.handle_checkout_expired(session).await
            }
            StripeEvent::PaymentIntentSucceeded(intent) => {
                self.handle_payment_succeeded(intent).await
            }
            StripeEvent::PaymentIntentFailed(intent) => self.handle_payment_failed(intent).await,
            StripeEvent::ChargeRefunded(charge) => self.handle_charge_refunded(charge).await,
            StripeEvent::TransferCreated(transfer) => self.handle_transfer_created(transfer).await,
            StripeEvent::AccountUpdated(account) => self.handle_account_updated(account).await,
            StripeEvent::Ignored { event_type } => {
                tracing::debug!(event_type = %event_type, "Ignoring unconsumed event type");
                Ok(Vec::new())
            }
        }
    }

    /// Checkout completed: the capture happened. Confirm the booking and
    /// upsert the escrow row to `held`, with the session metadata as the
    /// source of truth for amounts.
    async fn handle_checkout_completed(
        &self,
        session: CheckoutSession,
    ) -> Result<Vec<DomainEvent>> {
        let booking_id = session_booking_id(&session)?;

        let booking = self
            .get_booking(&booking_id)
            .await?
            .with_context(|| {
                format!(
                    "booking {} not found for completed checkout session {}",
                    booking_id, session.id
                )
            })?;

        let intent_id = session
            .payment_intent
            .clone()
            .with_context(|| format!("checkout session {} has no payment intent", session.id))?;

        let rental_amount = session
            .metadata_amount("rental_amount")
            .with_context(|| format!("session {} metadata missing rental_amount", session.id))?;
        let deposit_amount = session
            .metadata_amount("deposit_amount")
            .with_context(|| format!("session {} metadata missing deposit_amount", session.id))?;
        let platform_fee = session.metadata_amount("platform_fee").unwrap_or(0);

        let now = Utc::now();
        sqlx::query(
            "UPDATE bookings
             SET payment_status = 'completed',
                 status = CASE WHEN status = 'pending' THEN 'confirmed'::booking_status ELSE status END,
                 stripe_payment_intent_id = $2,
                 stripe_session_id = $3,
                 updated_at = $4
             WHERE id = $1",
        )
        .bind(booking_id)
        .bind(&intent_id)
        .bind(&session.id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        // The charge may not exist yet at session-completion time; the
        // payment_intent.succeeded event backfills it later.
        let intent = self
            .gateway
            .retrieve_payment_intent(&intent_id)
            .await
            .with_context(|| format!("failed to retrieve payment intent {}", intent_id))?;
        let charge_id = intent.latest_charge;

        // Without a payout destination the held funds would be
        // uncollectable; surface this loudly instead of continuing.
        let payout_exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM payout_accounts WHERE user_id = $1")
                .bind(booking.owner_id)
                .fetch_optional(&self.db_pool)
                .await?;
        if payout_exists.is_none() {
            bail!(
                "owner {} of booking {} has no connected payout account",
                booking.owner_id,
                booking_id
            );
        }

        sqlx::query(
            r#"
            INSERT INTO escrow_transactions (
                id, booking_id, rental_amount, deposit_amount, platform_fee,
                stripe_payment_intent_id, stripe_charge_id, escrow_status,
                held_until, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'held', $8, $9, $9)
            ON CONFLICT (booking_id) DO UPDATE SET
                escrow_status = CASE
                    WHEN escrow_transactions.escrow_status IN ('pending', 'held', 'failed')
                    THEN 'held'::escrow_status
                    ELSE escrow_transactions.escrow_status
                END,
                rental_amount = EXCLUDED.rental_amount,
                deposit_amount = EXCLUDED.deposit_amount,
                platform_fee = EXCLUDED.platform_fee,
                stripe_payment_intent_id = EXCLUDED.stripe_payment_intent_id,
                stripe_charge_id = COALESCE(EXCLUDED.stripe_charge_id, escrow_transactions.stripe_charge_id),
                held_until = COALESCE(escrow_transactions.held_until, EXCLUDED.held_until),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(booking_id)
        .bind(rental_amount)
        .bind(deposit_amount)
        .bind(platform_fee)
        .bind(&intent_id)
        .bind(&charge_id)
        .bind(booking.end_date)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(
            booking_id = %booking_id,
            session_id = %session.id,
            rental_amount,
            deposit_amount,
            "Escrow held for booking"
        );

        Ok(vec![DomainEvent::EscrowHeld {
            booking_id,
            amount: rental_amount + deposit_amount,
        }])
    }

    /// Checkout expired without payment: the booking's payment failed and
    /// any escrow row is voided.
    async fn handle_checkout_expired(&self, session: CheckoutSession) -> Result<Vec<DomainEvent>> {
        let booking_id = session_booking_id(&session)?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE bookings SET payment_status = 'failed', updated_at = $2
             WHERE id = $1 AND payment_status = 'pending'",
        )
        .bind(booking_id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        // The payment never completed, so the row carries no real money.
        sqlx::query(
            "UPDATE escrow_transactions
             SET escrow_status = 'failed', rental_amount = 0, deposit_amount = 0,
                 platform_fee = 0, updated_at = $2
             WHERE booking_id = $1 AND escrow_status IN ('pending', 'failed')",
        )
        .bind(booking_id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(booking_id = %booking_id, session_id = %session.id, "Checkout session expired");

        if updated.rows_affected() > 0 {
            Ok(vec![DomainEvent::PaymentFailed { booking_id }])
        } else {
            Ok(Vec::new())
        }
    }

    /// Payment intent succeeded: backfill the charge id the session-completed
    /// handler may have missed, and re-assert the booking's paid state.
    async fn handle_payment_succeeded(&self, intent: PaymentIntent) -> Result<Vec<DomainEvent>> {
        let now = Utc::now();

        if let Some(charge_id) = &intent.latest_charge {
            sqlx::query(
                "UPDATE escrow_transactions
                 SET stripe_charge_id = COALESCE(stripe_charge_id, $2), updated_at = $3
                 WHERE stripe_payment_intent_id = $1",
            )
            .bind(&intent.id)
            .bind(charge_id)
            .bind(now)
            .execute(&self.db_pool)
            .await?;
        }

        sqlx::query(
            "UPDATE bookings
             SET payment_status = 'completed',
                 status = CASE WHEN status = 'pending' THEN 'confirmed'::booking_status ELSE status END,
                 updated_at = $2
             WHERE stripe_payment_intent_id = $1",
        )
        .bind(&intent.id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        Ok(Vec::new())
    }

    /// Payment failed: mark it, but leave the booking status alone so the
    /// renter can retry checkout.
    async fn handle_payment_failed(&self, intent: PaymentIntent) -> Result<Vec<DomainEvent>> {
        let booking: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM bookings WHERE stripe_payment_intent_id = $1")
                .bind(&intent.id)
                .fetch_optional(&self.db_pool)
                .await?;

        let updated = sqlx::query(
            "UPDATE bookings SET payment_status = 'failed', updated_at = $2
             WHERE stripe_payment_intent_id = $1 AND payment_status = 'pending'",
        )
        .bind(&intent.id)
        .bind(Utc::now())
        .execute(&self.db_pool)
        .await?;

        tracing::warn!(payment_intent = %intent.id, "Payment failed");

        match booking {
            Some((booking_id,)) if updated.rows_affected() > 0 => {
                Ok(vec![DomainEvent::PaymentFailed { booking_id }])
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Charge refunded: mirror the refund onto the ledger and booking. A
    /// finished rental keeps its terminal status; anything earlier is
    /// cancelled.
    async fn handle_charge_refunded(&self, charge: Charge) -> Result<Vec<DomainEvent>> {
        let escrow: Option<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT id, booking_id FROM escrow_transactions WHERE stripe_charge_id = $1",
        )
        .bind(&charge.id)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((_, booking_id)) = escrow else {
            bail!("no escrow transaction found for refunded charge {}", charge.id);
        };

        let booking = self
            .get_booking(&booking_id)
            .await?
            .with_context(|| format!("booking {} missing for refunded charge", booking_id))?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE escrow_transactions
             SET escrow_status = 'refunded', refund_amount = $2, refund_reason = $3, updated_at = $4
             WHERE stripe_charge_id = $1",
        )
        .bind(&charge.id)
        .bind(charge.amount_refunded)
        .bind(charge.latest_refund_reason())
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "UPDATE bookings
             SET payment_status = 'refunded',
                 status = CASE
                     WHEN status IN ('returned', 'completed') THEN status
                     ELSE 'cancelled'::booking_status
                 END,
                 updated_at = $2
             WHERE id = $1",
        )
        .bind(booking_id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(
            booking_id = %booking_id,
            charge_id = %charge.id,
            amount_refunded = charge.amount_refunded,
            "Charge refunded"
        );

        Ok(vec![DomainEvent::EscrowRefunded {
            booking_id,
            renter_id: booking.renter_id,
            amount: charge.amount_refunded,
        }])
    }

    /// Transfer created: the payout landed. Mark the ledger released and
    /// mirror the paid state on the booking.
    async fn handle_transfer_created(&self, transfer: Transfer) -> Result<Vec<DomainEvent>> {
        let Some(source_charge) = &transfer.source_transaction else {
            // Not funded from a charge; not one of ours.
            tracing::debug!(transfer_id = %transfer.id, "Transfer without source charge; skipping");
            return Ok(Vec::new());
        };

        let escrow: Option<(Uuid,)> = sqlx::query_as(
            "SELECT booking_id FROM escrow_transactions WHERE stripe_charge_id = $1",
        )
        .bind(source_charge)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((booking_id,)) = escrow else {
            bail!(
                "no escrow transaction found for transfer {} (source charge {})",
                transfer.id,
                source_charge
            );
        };

        let now = Utc::now();
        sqlx::query(
            "UPDATE escrow_transactions
             SET transfer_id = $2,
                 release_date = COALESCE(release_date, $3),
                 escrow_status = CASE
                     WHEN escrow_status = 'refunded' THEN escrow_status
                     ELSE 'released'::escrow_status
                 END,
                 updated_at = $3
             WHERE stripe_charge_id = $1",
        )
        .bind(source_charge)
        .bind(&transfer.id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "UPDATE bookings SET payment_status = 'completed', updated_at = $2 WHERE id = $1",
        )
        .bind(booking_id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(
            booking_id = %booking_id,
            transfer_id = %transfer.id,
            amount = transfer.amount,
            "Payout transfer confirmed"
        );

        Ok(Vec::new())
    }

    /// Connected account updated: reconcile the local mirror row, creating
    /// it by email lookup for accounts born inside hosted onboarding.
    async fn handle_account_updated(&self, account: Account) -> Result<Vec<DomainEvent>> {
        let status = normalize_account_status(
            account.charges_enabled,
            account.payouts_enabled,
            account.details_submitted,
        );
        let requirements = account
            .requirements
            .as_ref()
            .map(|r| serde_json::to_value(&r.currently_due))
            .transpose()?;

        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE payout_accounts
             SET status = $2, charges_enabled = $3, payouts_enabled = $4,
                 details_submitted = $5, requirements_due = $6,
                 email = COALESCE($7, email), updated_at = $8
             WHERE stripe_account_id = $1",
        )
        .bind(&account.id)
        .bind(status)
        .bind(account.charges_enabled)
        .bind(account.payouts_enabled)
        .bind(account.details_submitted)
        .bind(&requirements)
        .bind(&account.email)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(Vec::new());
        }

        // No mirror row yet: the account was created entirely inside the
        // gateway's hosted onboarding. Attach it to a local user by email.
        let Some(email) = &account.email else {
            tracing::warn!(account_id = %account.id, "Unknown account with no email; cannot mirror");
            return Ok(Vec::new());
        };

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db_pool)
            .await?;

        let Some(user) = user else {
            tracing::warn!(
                account_id = %account.id,
                email = %email,
                "No local user for connected account email; cannot mirror"
            );
            return Ok(Vec::new());
        };

        sqlx::query(
            r#"
            INSERT INTO payout_accounts (
                id, user_id, stripe_account_id, status, charges_enabled,
                payouts_enabled, details_submitted, requirements_due, email,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (stripe_account_id) DO UPDATE SET
                status = EXCLUDED.status,
                charges_enabled = EXCLUDED.charges_enabled,
                payouts_enabled = EXCLUDED.payouts_enabled,
                details_submitted = EXCLUDED.details_submitted,
                requirements_due = EXCLUDED.requirements_due,
                email = EXCLUDED.email,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&account.id)
        .bind(status)
        .bind(account.charges_enabled)
        .bind(account.payouts_enabled)
        .bind(account.details_submitted)
        .bind(&requirements)
        .bind(email)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(
            account_id = %account.id,
            user_id = %user.id,
            status = ?status,
            "Mirrored connected account created in hosted onboarding"
        );

        Ok(Vec::new())
    }

    async fn get_booking(&self, id: &Uuid) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
    }
}

/// Booking id carried in the checkout session's metadata
fn session_booking_id(session: &CheckoutSession) -> Result<Uuid> {
    let raw = session
        .metadata
        .get("booking_id")
        .with_context(|| format!("checkout session {} metadata missing booking_id", session.id))?;

    raw.parse::<Uuid>()
        .with_context(|| format!("checkout session {} has malformed booking_id {:?}", session.id, raw))
}
