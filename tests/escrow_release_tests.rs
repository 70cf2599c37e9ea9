//! Release engine tests against a real database and an in-memory gateway
//!
//! These exercise the money-movement invariants: exactly one gateway call
//! per leg, leg independence, and safe retry after a gateway failure. They
//! require TEST_DATABASE_URL and are #[ignore]d by default.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rigshare_server::escrow::{EscrowService, EscrowStatus, ReleaseType};
use rigshare_server::models::{BookingStatus, PaymentStatus};

use common::{booking_row, escrow_row, seed_held_booking, setup_test_db, MockGateway};

#[tokio::test]
#[ignore] // Requires database setup
async fn test_return_confirmed_releases_both_legs() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let service = EscrowService::new(pool.clone(), gateway.clone());

    let seeded = seed_held_booking(&pool).await;

    let (outcome, _events) = service
        .release(seeded.booking_id, ReleaseType::ReturnConfirmed, false)
        .await
        .expect("release should succeed");

    assert!(outcome.success);
    assert!(outcome.transfer_id.is_some());
    assert!(outcome.refund_id.is_some());

    // One transfer of the rental to the owner, funded by the original charge
    assert_eq!(gateway.transfer_count(), 1);
    let transfer = &gateway.transfers.lock().unwrap()[0];
    assert_eq!(transfer.amount, 20000);
    assert_eq!(transfer.source_transaction, seeded.charge_id);

    // One refund of the deposit against the original payment intent
    assert_eq!(gateway.refund_count(), 1);
    let refund = &gateway.refunds.lock().unwrap()[0];
    assert_eq!(refund.amount, 10000);
    assert_eq!(refund.payment_intent, seeded.intent_id);

    let booking = booking_row(&pool, seeded.booking_id).await;
    assert_eq!(booking.status, BookingStatus::Completed);
    assert!(booking.rental_amount_released);
    assert!(booking.deposit_returned);
    assert!(booking.escrow_release_date.is_some());

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Released);
    assert!(escrow.rental_released_at.is_some());
    assert!(escrow.deposit_returned_at.is_some());
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_claim_owner_is_a_single_combined_transfer() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let service = EscrowService::new(pool.clone(), gateway.clone());

    let seeded = seed_held_booking(&pool).await;

    let (outcome, _events) = service
        .release(seeded.booking_id, ReleaseType::ClaimOwner, false)
        .await
        .expect("release should succeed");

    assert!(outcome.transfer_id.is_some());
    assert!(outcome.refund_id.is_none());

    // Rental and deposit move in one transfer of the arithmetic sum
    assert_eq!(gateway.transfer_count(), 1);
    assert_eq!(gateway.refund_count(), 0);
    assert_eq!(gateway.transfers.lock().unwrap()[0].amount, 30000);

    let booking = booking_row(&pool, seeded.booking_id).await;
    assert!(booking.rental_amount_released);
    assert!(booking.deposit_returned);

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Released);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_renter_approved_claim_refunds_everything() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let service = EscrowService::new(pool.clone(), gateway.clone());

    let seeded = seed_held_booking(&pool).await;

    let (outcome, _events) = service
        .release(seeded.booking_id, ReleaseType::ClaimRenterApproved, false)
        .await
        .expect("release should succeed");

    assert!(outcome.refund_id.is_some());
    assert_eq!(gateway.transfer_count(), 0);
    assert_eq!(gateway.refund_count(), 1);
    assert_eq!(gateway.refunds.lock().unwrap()[0].amount, 30000);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_second_release_is_rejected() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let service = EscrowService::new(pool.clone(), gateway.clone());

    let seeded = seed_held_booking(&pool).await;

    service
        .release(seeded.booking_id, ReleaseType::ReturnConfirmed, false)
        .await
        .expect("first release should succeed");

    let second = service
        .release(seeded.booking_id, ReleaseType::ReturnConfirmed, false)
        .await;
    assert!(second.is_err(), "second release must be rejected");

    // Still exactly one transfer and one refund at the gateway
    assert_eq!(gateway.transfer_count(), 1);
    assert_eq!(gateway.refund_count(), 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_leg_independence_retry_only_touches_remaining_leg() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let service = EscrowService::new(pool.clone(), gateway.clone());

    let seeded = seed_held_booking(&pool).await;

    // Rental leg already settled by an earlier call
    sqlx::query("UPDATE bookings SET rental_amount_released = TRUE WHERE id = $1")
        .bind(seeded.booking_id)
        .execute(&pool)
        .await
        .unwrap();

    let (outcome, _events) = service
        .release(seeded.booking_id, ReleaseType::ReturnConfirmed, false)
        .await
        .expect("release should succeed");

    // No second rental transfer; only the deposit refund
    assert_eq!(gateway.transfer_count(), 0);
    assert_eq!(gateway.refund_count(), 1);
    assert!(outcome.transfer_id.is_none());
    assert!(outcome.refund_id.is_some());

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Released);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_gateway_failure_leaves_leg_retryable() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let service = EscrowService::new(pool.clone(), gateway.clone());

    let seeded = seed_held_booking(&pool).await;

    gateway.fail_next.store(true, Ordering::SeqCst);
    let failed = service
        .release(seeded.booking_id, ReleaseType::ClaimOwner, false)
        .await;
    assert!(failed.is_err(), "gateway failure must surface");

    // Leg flags were reverted and the failure reason recorded
    let booking = booking_row(&pool, seeded.booking_id).await;
    assert!(!booking.rental_amount_released);
    assert!(!booking.deposit_returned);
    assert_ne!(booking.status, BookingStatus::Completed);

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert!(escrow.transfer_failure_reason.is_some());
    assert_eq!(escrow.escrow_status, EscrowStatus::TransferFailed);

    // Retrying after the cause is fixed succeeds and moves each leg once
    let (outcome, _events) = service
        .release(seeded.booking_id, ReleaseType::ClaimOwner, false)
        .await
        .expect("retry should succeed");
    assert!(outcome.transfer_id.is_some());
    assert_eq!(gateway.transfer_count(), 1);

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Released);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_release_rejected_when_escrow_not_held() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let service = EscrowService::new(pool.clone(), gateway.clone());

    let seeded = seed_held_booking(&pool).await;

    sqlx::query("UPDATE escrow_transactions SET escrow_status = 'refunded' WHERE booking_id = $1")
        .bind(seeded.booking_id)
        .execute(&pool)
        .await
        .unwrap();

    let result = service
        .release(seeded.booking_id, ReleaseType::ReturnConfirmed, false)
        .await;
    assert!(result.is_err());
    assert_eq!(gateway.transfer_count(), 0);
    assert_eq!(gateway.refund_count(), 0);

    let booking = booking_row(&pool, seeded.booking_id).await;
    assert_eq!(booking.payment_status, PaymentStatus::Completed);
}
