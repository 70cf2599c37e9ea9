//! Escrow release engine
//!
//! Moves held funds to their final destination exactly once per leg. The
//! double-release guard is a pair of conditional updates: each leg is
//! claimed by flipping its booking flag `WHERE flag = FALSE` before the
//! gateway is called, so two concurrent release calls for the same booking
//! cannot both move the same leg. A claim is reverted if the gateway call
//! fails, leaving the leg retryable.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::error::{ApiError, ApiResult};
use crate::models::{Booking, PayoutAccount};
use crate::stripe::{GatewayError, PaymentGateway, RefundRequest, TransferRequest};

use super::events::DomainEvent;
use super::model::{EscrowStatus, EscrowTransaction, ReleaseOutcome, ReleaseType};
use super::plan::{LegAction, ReleasePlan};

const CURRENCY: &str = "usd";

/// One of the two independently releasable portions of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Rental,
    Deposit,
}

impl Leg {
    fn flag_column(&self) -> &'static str {
        match self {
            Leg::Rental => "rental_amount_released",
            Leg::Deposit => "deposit_returned",
        }
    }
}

/// A single gateway call covering one or both claimed legs
struct LegGroup {
    legs: Vec<Leg>,
    action: LegAction,
    amount: i64,
}

/// Escrow release engine
pub struct EscrowService {
    db_pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
}

impl EscrowService {
    pub fn new(db_pool: PgPool, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db_pool, gateway }
    }

    /// Fetch the ledger row for a booking
    pub async fn get_escrow(&self, booking_id: &Uuid) -> ApiResult<Option<EscrowTransaction>> {
        let escrow = sqlx::query_as::<_, EscrowTransaction>(
            "SELECT * FROM escrow_transactions WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(escrow)
    }

    /// Fetch the connected payout account mirror for a user
    pub async fn get_payout_account(&self, user_id: &Uuid) -> ApiResult<Option<PayoutAccount>> {
        let account = sqlx::query_as::<_, PayoutAccount>(
            "SELECT * FROM payout_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(account)
    }

    /// Release escrowed funds for a booking
    ///
    /// Returns the outcome plus the domain events the caller should hand to
    /// the notification dispatcher.
    pub async fn release(
        &self,
        booking_id: Uuid,
        release_type: ReleaseType,
        deposit_to_owner: bool,
    ) -> ApiResult<(ReleaseOutcome, Vec<DomainEvent>)> {
        let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Booking {} not found", booking_id)))?;

        let escrow = self
            .get_escrow(&booking_id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("No escrow transaction for booking {}", booking_id))
            })?;

        if !escrow.escrow_status.is_releasable() {
            return Err(ApiError::BadRequest(format!(
                "Escrow for booking {} is not releasable (status: {:?})",
                booking_id, escrow.escrow_status
            )));
        }

        let plan = ReleasePlan::for_type(release_type, deposit_to_owner);

        // Gateway prerequisites are resolved before any leg is claimed so a
        // precondition failure has no side effects.
        let payout_account = if plan.needs_transfer() {
            Some(self.transfer_ready_account(&booking).await?)
        } else {
            None
        };

        let charge_id = if plan.needs_transfer() {
            Some(escrow.stripe_charge_id.clone().ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Escrow for booking {} has no charge reference yet",
                    booking_id
                ))
            })?)
        } else {
            None
        };

        let intent_id = if plan.needs_refund() {
            Some(escrow.stripe_payment_intent_id.clone().ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Escrow for booking {} has no payment intent reference",
                    booking_id
                ))
            })?)
        } else {
            None
        };

        // Claim each planned leg. rows_affected = 0 means a concurrent call
        // (or an earlier release) already owns that leg.
        let rental_claimed = match plan.rental {
            Some(_) => self.claim_leg(booking_id, Leg::Rental).await?,
            None => false,
        };
        let deposit_claimed = match plan.deposit {
            Some(_) => self.claim_leg(booking_id, Leg::Deposit).await?,
            None => false,
        };

        if !rental_claimed && !deposit_claimed {
            return Err(ApiError::BadRequest(format!(
                "No releasable legs remaining for booking {}",
                booking_id
            )));
        }

        let groups = build_groups(&plan, &escrow, rental_claimed, deposit_claimed);

        let mut events: Vec<DomainEvent> = Vec::new();
        let mut transfer_id: Option<String> = None;
        let mut refund_id: Option<String> = None;

        for group in &groups {
            match group.action {
                LegAction::TransferToOwner => {
                    let (Some(account), Some(charge)) =
                        (payout_account.as_ref(), charge_id.as_ref())
                    else {
                        return Err(ApiError::InternalError(
                            "transfer prerequisites were not resolved".to_string(),
                        ));
                    };
                    let request = TransferRequest {
                        amount: group.amount,
                        currency: CURRENCY.to_string(),
                        destination: account.stripe_account_id.clone(),
                        source_transaction: charge.clone(),
                        booking_id: booking_id.to_string(),
                        description: format!("Escrow release ({})", release_type.as_str()),
                    };

                    match self.gateway.create_transfer(request).await {
                        Ok(transfer) => {
                            let now = Utc::now();
                            for leg in &group.legs {
                                self.stamp_leg(booking_id, *leg, group.action, &transfer.id, now)
                                    .await?;
                                events.push(match leg {
                                    Leg::Rental => DomainEvent::RentalReleased {
                                        booking_id,
                                        owner_id: booking.owner_id,
                                        amount: escrow.rental_amount,
                                    },
                                    Leg::Deposit => DomainEvent::DepositForfeited {
                                        booking_id,
                                        owner_id: booking.owner_id,
                                        amount: escrow.deposit_amount,
                                    },
                                });
                            }
                            transfer_id = Some(transfer.id);
                        }
                        Err(e) => {
                            self.fail_group(booking_id, group, &e).await?;
                            return Err(ApiError::GatewayError {
                                details: e.to_string(),
                            });
                        }
                    }
                }
                LegAction::RefundToRenter => {
                    let Some(intent) = intent_id.as_ref() else {
                        return Err(ApiError::InternalError(
                            "refund prerequisites were not resolved".to_string(),
                        ));
                    };
                    let request = RefundRequest {
                        amount: group.amount,
                        payment_intent: intent.clone(),
                        booking_id: booking_id.to_string(),
                        reason: None,
                    };

                    match self.gateway.create_refund(request).await {
                        Ok(refund) => {
                            let now = Utc::now();
                            for leg in &group.legs {
                                self.stamp_leg(booking_id, *leg, group.action, &refund.id, now)
                                    .await?;
                            }
                            events.push(if group.legs.len() == 2 {
                                DomainEvent::EscrowRefunded {
                                    booking_id,
                                    renter_id: booking.renter_id,
                                    amount: group.amount,
                                }
                            } else {
                                DomainEvent::DepositReturned {
                                    booking_id,
                                    renter_id: booking.renter_id,
                                    amount: group.amount,
                                }
                            });
                            refund_id = Some(refund.id);
                        }
                        Err(e) => {
                            self.fail_group(booking_id, group, &e).await?;
                            return Err(ApiError::GatewayError {
                                details: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if self.finalize_if_settled(booking_id).await? {
            events.push(DomainEvent::EscrowReleased { booking_id });
        }

        let message = describe_release(release_type, rental_claimed, deposit_claimed);
        tracing::info!(
            booking_id = %booking_id,
            release_type = release_type.as_str(),
            rental_claimed,
            deposit_claimed,
            "Escrow release completed"
        );

        Ok((
            ReleaseOutcome {
                success: true,
                booking_id,
                release_type,
                transfer_id,
                refund_id,
                message,
            },
            events,
        ))
    }

    /// Owner's payout account, verified ready for transfers
    async fn transfer_ready_account(&self, booking: &Booking) -> ApiResult<PayoutAccount> {
        let account = sqlx::query_as::<_, PayoutAccount>(
            "SELECT * FROM payout_accounts WHERE user_id = $1",
        )
        .bind(booking.owner_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Owner {} has no connected payout account",
                booking.owner_id
            ))
        })?;

        if !account.is_transfer_ready() {
            return Err(ApiError::BadRequest(format!(
                "Owner {} payout account is not ready for transfers (status: {:?})",
                booking.owner_id, account.status
            )));
        }

        Ok(account)
    }

    /// Atomically claim a leg by flipping its booking flag false-to-true
    async fn claim_leg(&self, booking_id: Uuid, leg: Leg) -> Result<bool, sqlx::Error> {
        let column = leg.flag_column();
        let result = sqlx::query(&format!(
            "UPDATE bookings SET {col} = TRUE, updated_at = $2 WHERE id = $1 AND {col} = FALSE",
            col = column
        ))
        .bind(booking_id)
        .bind(Utc::now())
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Give a claimed leg back after a failed gateway call
    async fn revert_leg(&self, booking_id: Uuid, leg: Leg) -> Result<(), sqlx::Error> {
        let column = leg.flag_column();
        sqlx::query(&format!(
            "UPDATE bookings SET {col} = FALSE, updated_at = $2 WHERE id = $1 AND {col} = TRUE",
            col = column
        ))
        .bind(booking_id)
        .bind(Utc::now())
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    /// Record a successful leg on the ledger
    async fn stamp_leg(
        &self,
        booking_id: Uuid,
        leg: Leg,
        action: LegAction,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let sql = match (leg, action) {
            (Leg::Rental, LegAction::TransferToOwner) => {
                "UPDATE escrow_transactions
                 SET rental_transfer_id = $2, transfer_id = $2, rental_released_at = $3, updated_at = $3
                 WHERE booking_id = $1"
            }
            (Leg::Deposit, LegAction::TransferToOwner) => {
                "UPDATE escrow_transactions
                 SET transfer_id = $2, deposit_returned_at = $3, updated_at = $3
                 WHERE booking_id = $1"
            }
            (Leg::Rental, LegAction::RefundToRenter) => {
                "UPDATE escrow_transactions
                 SET rental_released_at = $3, updated_at = $3
                 WHERE booking_id = $1"
            }
            (Leg::Deposit, LegAction::RefundToRenter) => {
                "UPDATE escrow_transactions
                 SET deposit_refund_id = $2, deposit_returned_at = $3, updated_at = $3
                 WHERE booking_id = $1"
            }
        };

        sqlx::query(sql)
            .bind(booking_id)
            .bind(external_id)
            .bind(now)
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }

    /// Revert a group's leg claims and record the gateway failure
    ///
    /// Transient failures leave the escrow `held` so the same call can be
    /// retried; deterministic gateway rejections park the row in
    /// `transfer_failed` for operator follow-up.
    async fn fail_group(
        &self,
        booking_id: Uuid,
        group: &LegGroup,
        error: &GatewayError,
    ) -> Result<(), sqlx::Error> {
        tracing::error!(
            booking_id = %booking_id,
            error = %error,
            permanent = error.is_permanent(),
            "Gateway call failed during escrow release"
        );

        for leg in &group.legs {
            self.revert_leg(booking_id, *leg).await?;
        }

        let sql = if error.is_permanent() {
            "UPDATE escrow_transactions
             SET transfer_failure_reason = $2, escrow_status = 'transfer_failed', updated_at = $3
             WHERE booking_id = $1 AND escrow_status IN ('held', 'transfer_failed')"
        } else {
            "UPDATE escrow_transactions
             SET transfer_failure_reason = $2, updated_at = $3
             WHERE booking_id = $1"
        };

        sqlx::query(sql)
            .bind(booking_id)
            .bind(error.to_string())
            .bind(Utc::now())
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }

    /// Close out the escrow once both legs have settled
    ///
    /// The held-to-released transition is a single conditional update;
    /// zero rows affected means a concurrent call (or the transfer webhook)
    /// already closed it.
    async fn finalize_if_settled(&self, booking_id: Uuid) -> Result<bool, sqlx::Error> {
        let flags: Option<(bool, bool)> = sqlx::query_as(
            "SELECT rental_amount_released, deposit_returned FROM bookings WHERE id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((rental_done, deposit_done)) = flags else {
            return Ok(false);
        };
        if !(rental_done && deposit_done) {
            return Ok(false);
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE escrow_transactions
             SET escrow_status = 'released', release_date = $2, updated_at = $2
             WHERE booking_id = $1 AND escrow_status IN ('held', 'transfer_failed')",
        )
        .bind(booking_id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE bookings
             SET status = 'completed', escrow_release_date = $2, updated_at = $2
             WHERE id = $1",
        )
        .bind(booking_id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        Ok(true)
    }
}

/// Group the claimed legs into gateway calls
///
/// Combined plans move every claimed leg in one call; split plans get one
/// call per leg. Amounts are summed from the ledger's per-leg amounts, never
/// derived from a stored total.
fn build_groups(
    plan: &ReleasePlan,
    escrow: &EscrowTransaction,
    rental_claimed: bool,
    deposit_claimed: bool,
) -> Vec<LegGroup> {
    let mut claimed: Vec<(Leg, LegAction, i64)> = Vec::new();
    if rental_claimed {
        if let Some(action) = plan.rental {
            claimed.push((Leg::Rental, action, escrow.rental_amount));
        }
    }
    if deposit_claimed {
        if let Some(action) = plan.deposit {
            claimed.push((Leg::Deposit, action, escrow.deposit_amount));
        }
    }

    if plan.combined && claimed.len() == 2 {
        let action = claimed[0].1;
        let amount = claimed.iter().map(|(_, _, a)| a).sum();
        return vec![LegGroup {
            legs: claimed.iter().map(|(leg, _, _)| *leg).collect(),
            action,
            amount,
        }];
    }

    claimed
        .into_iter()
        .map(|(leg, action, amount)| LegGroup {
            legs: vec![leg],
            action,
            amount,
        })
        .collect()
}

fn describe_release(release_type: ReleaseType, rental_claimed: bool, deposit_claimed: bool) -> String {
    match (rental_claimed, deposit_claimed) {
        (true, true) => format!("Both escrow legs released ({})", release_type.as_str()),
        (true, false) => format!("Rental leg released ({})", release_type.as_str()),
        (false, true) => format!("Deposit leg released ({})", release_type.as_str()),
        (false, false) => format!("No legs released ({})", release_type.as_str()),
    }
}
