//! Claim workflow: filing, review, and admin resolution
//!
//! Resolution is the only place a claim touches money: the admin decision
//! plus the claimant's role pick the release type handed to the escrow
//! engine. Recording the decision and moving the funds are deliberately
//! decoupled so a gateway failure never blocks the decision itself.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::escrow::{DomainEvent, EscrowService, ReleaseOutcome, ReleaseType};
use crate::models::{Booking, BookingStatus, PaymentStatus};

use super::model::{
    Claim, ClaimDecision, ClaimStatus, ClaimantRole, CreateClaimRequest, ListClaimsQuery,
    ResolveClaimRequest,
};

/// Determine which side of the booking the claimant is on
pub fn claimant_role(booking: &Booking, claimant_id: Uuid) -> Option<ClaimantRole> {
    if claimant_id == booking.owner_id {
        Some(ClaimantRole::Owner)
    } else if claimant_id == booking.renter_id {
        Some(ClaimantRole::Renter)
    } else {
        None
    }
}

/// Map (claimant role, admin decision) to the release type to invoke
///
/// An owner's rejected claim still settles normally (rental to owner,
/// deposit back); a renter's rejected claim settles owner-favored because
/// the dispute failed.
pub fn release_type_for_decision(role: ClaimantRole, decision: ClaimDecision) -> ReleaseType {
    match (role, decision) {
        (ClaimantRole::Owner, ClaimDecision::Approved) => ReleaseType::ClaimOwner,
        (ClaimantRole::Owner, ClaimDecision::Rejected) => ReleaseType::ClaimDenied,
        (ClaimantRole::Renter, ClaimDecision::Approved) => ReleaseType::ClaimRenterApproved,
        (ClaimantRole::Renter, ClaimDecision::Rejected) => ReleaseType::ClaimOwner,
    }
}

/// Outcome of a claim resolution: the decision always persists; the fund
/// movement may independently fail and must then be surfaced to the admin.
pub struct ClaimResolution {
    pub claim: Claim,
    pub events: Vec<DomainEvent>,
    pub release: Result<ReleaseOutcome, ApiError>,
}

/// Claim service
pub struct ClaimService {
    db_pool: PgPool,
    escrow_service: Arc<EscrowService>,
}

impl ClaimService {
    pub fn new(db_pool: PgPool, escrow_service: Arc<EscrowService>) -> Self {
        Self {
            db_pool,
            escrow_service,
        }
    }

    /// File a claim against an eligible booking
    pub async fn file_claim(
        &self,
        request: CreateClaimRequest,
    ) -> ApiResult<(Claim, Vec<DomainEvent>)> {
        request.validate()?;

        let booking = self.get_booking(&request.booking_id).await?.ok_or_else(|| {
            ApiError::NotFound(format!("Booking {} not found", request.booking_id))
        })?;

        if claimant_role(&booking, request.claimant_id).is_none() {
            return Err(ApiError::BadRequest(
                "Claimant is neither the owner nor the renter of this booking".to_string(),
            ));
        }

        if booking.payment_status != PaymentStatus::Completed {
            return Err(ApiError::BadRequest(
                "Claims can only be filed against paid bookings".to_string(),
            ));
        }

        if !matches!(
            booking.status,
            BookingStatus::Active
                | BookingStatus::Returned
                | BookingStatus::Completed
                | BookingStatus::Disputed
        ) {
            return Err(ApiError::BadRequest(format!(
                "Claims cannot be filed against a booking in status {:?}",
                booking.status
            )));
        }

        let now = Utc::now();
        let claim = sqlx::query_as::<_, Claim>(
            r#"
            INSERT INTO claims (
                id, booking_id, claimant_id, claim_type, description,
                amount_requested, evidence_urls, claim_status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.booking_id)
        .bind(request.claimant_id)
        .bind(&request.claim_type)
        .bind(&request.description)
        .bind(request.amount_requested)
        .bind(&request.evidence_urls)
        .bind(now)
        .fetch_one(&self.db_pool)
        .await?;

        // Flag the booking as disputed while the rental is still in flight;
        // a finished rental keeps its terminal status.
        sqlx::query(
            "UPDATE bookings SET status = 'disputed', updated_at = $2
             WHERE id = $1 AND status IN ('active', 'returned')",
        )
        .bind(booking.id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(
            claim_id = %claim.id,
            booking_id = %claim.booking_id,
            claimant_id = %claim.claimant_id,
            "Claim filed"
        );

        let events = vec![DomainEvent::ClaimFiled {
            claim_id: claim.id,
            booking_id: claim.booking_id,
            claimant_id: claim.claimant_id,
        }];

        Ok((claim, events))
    }

    /// Get a single claim by ID
    pub async fn get_claim(&self, id: &Uuid) -> ApiResult<Option<Claim>> {
        let claim = sqlx::query_as::<_, Claim>("SELECT * FROM claims WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(claim)
    }

    /// List claims with filtering and pagination
    pub async fn list_claims(&self, query: ListClaimsQuery) -> ApiResult<Vec<Claim>> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * limit;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM claims WHERE 1=1");

        if let Some(status) = query.status {
            query_builder.push(" AND claim_status = ");
            query_builder.push_bind(status);
        }
        if let Some(booking_id) = query.booking_id {
            query_builder.push(" AND booking_id = ");
            query_builder.push_bind(booking_id);
        }

        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(limit as i64);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset as i64);

        let claims = query_builder
            .build_query_as::<Claim>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(claims)
    }

    /// Move a pending claim to under_review. Never touches funds.
    pub async fn review_claim(&self, id: &Uuid) -> ApiResult<(Claim, Vec<DomainEvent>)> {
        let claim = sqlx::query_as::<_, Claim>(
            "UPDATE claims SET claim_status = 'under_review', updated_at = $2
             WHERE id = $1 AND claim_status = 'pending'
             RETURNING *",
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "Claim {} is not pending and cannot move to review",
                id
            ))
        })?;

        let events = vec![DomainEvent::ClaimStatusChanged {
            claim_id: claim.id,
            booking_id: claim.booking_id,
            status: claim.claim_status,
        }];

        Ok((claim, events))
    }

    /// Record an admin decision and trigger the matching escrow release
    pub async fn resolve_claim(
        &self,
        id: &Uuid,
        request: ResolveClaimRequest,
    ) -> ApiResult<ClaimResolution> {
        let claim = self
            .get_claim(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Claim {} not found", id)))?;

        if !claim.claim_status.is_open() {
            return Err(ApiError::Conflict(format!(
                "Claim {} is already resolved ({:?})",
                id, claim.claim_status
            )));
        }

        let booking = self.get_booking(&claim.booking_id).await?.ok_or_else(|| {
            ApiError::NotFound(format!("Booking {} not found", claim.booking_id))
        })?;

        let role = match claimant_role(&booking, claim.claimant_id) {
            Some(role) => role,
            None => {
                // Pre-existing bad row: the filing path rejects these, so
                // this only fires on data written outside the workflow.
                tracing::warn!(
                    claim_id = %claim.id,
                    booking_id = %booking.id,
                    claimant_id = %claim.claimant_id,
                    "Claimant matches neither party; applying owner-favored fallback"
                );
                ClaimantRole::Owner
            }
        };

        let release_type = release_type_for_decision(role, request.decision);
        let new_status = match request.decision {
            ClaimDecision::Approved => ClaimStatus::Approved,
            ClaimDecision::Rejected => ClaimStatus::Rejected,
        };

        // Forward-only transition; zero rows means a concurrent resolution
        // won the race.
        let claim = sqlx::query_as::<_, Claim>(
            "UPDATE claims
             SET claim_status = $2, resolved_by = $3, resolution_notes = $4, updated_at = $5
             WHERE id = $1 AND claim_status IN ('pending', 'under_review')
             RETURNING *",
        )
        .bind(id)
        .bind(new_status)
        .bind(request.resolved_by)
        .bind(&request.resolution_notes)
        .bind(Utc::now())
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!("Claim {} was resolved by a concurrent request", id))
        })?;

        tracing::info!(
            claim_id = %claim.id,
            booking_id = %claim.booking_id,
            decision = ?request.decision,
            release_type = release_type.as_str(),
            "Claim resolved"
        );

        let mut events = vec![DomainEvent::ClaimStatusChanged {
            claim_id: claim.id,
            booking_id: claim.booking_id,
            status: claim.claim_status,
        }];

        let release = match self
            .escrow_service
            .release(claim.booking_id, release_type, false)
            .await
        {
            Ok((outcome, release_events)) => {
                events.extend(release_events);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    claim_id = %claim.id,
                    booking_id = %claim.booking_id,
                    error = %e,
                    "Claim decision recorded but escrow release failed"
                );
                Err(e)
            }
        };

        Ok(ClaimResolution {
            claim,
            events,
            release,
        })
    }

    async fn get_booking(&self, id: &Uuid) -> ApiResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_booking(owner_id: Uuid, renter_id: Uuid) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            owner_id,
            renter_id,
            rental_amount: 20000,
            deposit_amount: 10000,
            platform_fee: 2000,
            total_amount: 32000,
            start_date: Utc::now(),
            end_date: Utc::now(),
            status: BookingStatus::Active,
            payment_status: PaymentStatus::Completed,
            rental_amount_released: false,
            deposit_returned: false,
            escrow_release_date: None,
            stripe_session_id: None,
            stripe_payment_intent_id: Some("pi_1".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_decision_routing_table() {
        assert_eq!(
            release_type_for_decision(ClaimantRole::Owner, ClaimDecision::Approved),
            ReleaseType::ClaimOwner
        );
        assert_eq!(
            release_type_for_decision(ClaimantRole::Owner, ClaimDecision::Rejected),
            ReleaseType::ClaimDenied
        );
        assert_eq!(
            release_type_for_decision(ClaimantRole::Renter, ClaimDecision::Approved),
            ReleaseType::ClaimRenterApproved
        );
        assert_eq!(
            release_type_for_decision(ClaimantRole::Renter, ClaimDecision::Rejected),
            ReleaseType::ClaimOwner
        );
    }

    #[test]
    fn test_claimant_role_lookup() {
        let owner_id = Uuid::new_v4();
        let renter_id = Uuid::new_v4();
        let booking = test_booking(owner_id, renter_id);

        assert_eq!(
            claimant_role(&booking, owner_id),
            Some(ClaimantRole::Owner)
        );
        assert_eq!(
            claimant_role(&booking, renter_id),
            Some(ClaimantRole::Renter)
        );
        assert_eq!(claimant_role(&booking, Uuid::new_v4()), None);
    }

    #[test]
    fn test_claim_status_openness() {
        assert!(ClaimStatus::Pending.is_open());
        assert!(ClaimStatus::UnderReview.is_open());
        assert!(!ClaimStatus::Approved.is_open());
        assert!(!ClaimStatus::Rejected.is_open());
    }
}
