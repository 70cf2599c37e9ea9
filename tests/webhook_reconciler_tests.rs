//! Webhook reconciler tests: replay idempotency and guard behavior
//!
//! Require TEST_DATABASE_URL; #[ignore]d by default.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use rigshare_server::escrow::EscrowStatus;
use rigshare_server::models::{BookingStatus, PaymentStatus, PayoutAccountStatus};
use rigshare_server::stripe::{Account, Charge, CheckoutSession, StripeEvent, Transfer};
use rigshare_server::webhooks::WebhookReconciler;

use common::{booking_row, escrow_row, seed_held_booking, seed_user, setup_test_db, MockGateway};

fn completed_session(seeded: &common::SeededBooking) -> CheckoutSession {
    CheckoutSession {
        id: format!("cs_{}", seeded.booking_id.simple()),
        payment_intent: Some(seeded.intent_id.clone()),
        metadata: HashMap::from([
            ("booking_id".to_string(), seeded.booking_id.to_string()),
            ("rental_amount".to_string(), "20000".to_string()),
            ("deposit_amount".to_string(), "10000".to_string()),
            ("platform_fee".to_string(), "2000".to_string()),
        ]),
    }
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_checkout_completed_replay_is_idempotent() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let reconciler = WebhookReconciler::new(pool.clone(), gateway);

    let seeded = seed_held_booking(&pool).await;
    // Start from a fresh checkout: booking unpaid, escrow row pending
    sqlx::query(
        "UPDATE bookings SET status = 'pending', payment_status = 'pending' WHERE id = $1",
    )
    .bind(seeded.booking_id)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "UPDATE escrow_transactions SET escrow_status = 'pending', stripe_charge_id = NULL
         WHERE booking_id = $1",
    )
    .bind(seeded.booking_id)
    .execute(&pool)
    .await
    .unwrap();

    let session = completed_session(&seeded);

    // Deliver the same event twice, as a redelivering gateway would
    reconciler
        .process(StripeEvent::CheckoutSessionCompleted(session.clone()))
        .await
        .expect("first delivery should succeed");
    reconciler
        .process(StripeEvent::CheckoutSessionCompleted(session))
        .await
        .expect("replay should succeed");

    // Exactly one escrow row, held, with metadata amounts
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM escrow_transactions WHERE booking_id = $1")
            .bind(seeded.booking_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count.0, 1);

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Held);
    assert_eq!(escrow.rental_amount, 20000);
    assert_eq!(escrow.deposit_amount, 10000);
    assert_eq!(escrow.platform_fee, 2000);
    assert!(escrow.held_until.is_some());

    let booking = booking_row(&pool, seeded.booking_id).await;
    assert_eq!(booking.payment_status, PaymentStatus::Completed);
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_refund_after_completion_keeps_booking_completed() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let reconciler = WebhookReconciler::new(pool.clone(), gateway);

    let seeded = seed_held_booking(&pool).await;
    sqlx::query("UPDATE bookings SET status = 'completed' WHERE id = $1")
        .bind(seeded.booking_id)
        .execute(&pool)
        .await
        .unwrap();

    let charge = Charge {
        id: seeded.charge_id.clone(),
        payment_intent: Some(seeded.intent_id.clone()),
        amount: 30000,
        amount_refunded: 5000,
        refunded: false,
        refunds: None,
    };

    reconciler
        .process(StripeEvent::ChargeRefunded(charge))
        .await
        .expect("refund event should process");

    // A post-completion partial refund must not revert the booking
    let booking = booking_row(&pool, seeded.booking_id).await;
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.payment_status, PaymentStatus::Refunded);

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Refunded);
    assert_eq!(escrow.refund_amount, Some(5000));
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_refund_before_completion_cancels_booking() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let reconciler = WebhookReconciler::new(pool.clone(), gateway);

    let seeded = seed_held_booking(&pool).await;

    let charge = Charge {
        id: seeded.charge_id.clone(),
        payment_intent: Some(seeded.intent_id.clone()),
        amount: 30000,
        amount_refunded: 30000,
        refunded: true,
        refunds: None,
    };

    reconciler
        .process(StripeEvent::ChargeRefunded(charge))
        .await
        .expect("refund event should process");

    let booking = booking_row(&pool, seeded.booking_id).await;
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(booking.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_expired_checkout_voids_payment_and_escrow() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let reconciler = WebhookReconciler::new(pool.clone(), gateway);

    let seeded = seed_held_booking(&pool).await;
    // The checkout never completed for this booking
    sqlx::query(
        "UPDATE bookings SET status = 'pending', payment_status = 'pending' WHERE id = $1",
    )
    .bind(seeded.booking_id)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "UPDATE escrow_transactions SET escrow_status = 'pending' WHERE booking_id = $1",
    )
    .bind(seeded.booking_id)
    .execute(&pool)
    .await
    .unwrap();

    let session = CheckoutSession {
        id: "cs_expired".to_string(),
        payment_intent: None,
        metadata: HashMap::from([(
            "booking_id".to_string(),
            seeded.booking_id.to_string(),
        )]),
    };

    reconciler
        .process(StripeEvent::CheckoutSessionExpired(session))
        .await
        .expect("expired event should process");

    let booking = booking_row(&pool, seeded.booking_id).await;
    assert_eq!(booking.payment_status, PaymentStatus::Failed);

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Failed);
    assert_eq!(escrow.rental_amount, 0);
    assert_eq!(escrow.deposit_amount, 0);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_payment_failed_does_not_cancel_booking() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let reconciler = WebhookReconciler::new(pool.clone(), gateway);

    let seeded = seed_held_booking(&pool).await;
    sqlx::query(
        "UPDATE bookings SET status = 'pending', payment_status = 'pending' WHERE id = $1",
    )
    .bind(seeded.booking_id)
    .execute(&pool)
    .await
    .unwrap();

    let intent = rigshare_server::stripe::PaymentIntent {
        id: seeded.intent_id.clone(),
        status: "requires_payment_method".to_string(),
        amount: 30000,
        currency: "usd".to_string(),
        latest_charge: None,
    };

    reconciler
        .process(StripeEvent::PaymentIntentFailed(intent))
        .await
        .expect("failed-payment event should process");

    // payment_status flips, but the booking itself is left for a retry
    let booking = booking_row(&pool, seeded.booking_id).await;
    assert_eq!(booking.payment_status, PaymentStatus::Failed);
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_transfer_created_marks_escrow_released() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let reconciler = WebhookReconciler::new(pool.clone(), gateway);

    let seeded = seed_held_booking(&pool).await;

    let transfer = Transfer {
        id: "tr_webhook_1".to_string(),
        amount: 20000,
        currency: "usd".to_string(),
        destination: "acct_owner".to_string(),
        source_transaction: Some(seeded.charge_id.clone()),
    };

    reconciler
        .process(StripeEvent::TransferCreated(transfer))
        .await
        .expect("transfer event should process");

    let escrow = escrow_row(&pool, seeded.booking_id).await;
    assert_eq!(escrow.escrow_status, EscrowStatus::Released);
    assert_eq!(escrow.transfer_id.as_deref(), Some("tr_webhook_1"));
    assert!(escrow.release_date.is_some());
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_account_updated_creates_mirror_by_email() {
    let pool = setup_test_db().await;
    let gateway = Arc::new(MockGateway::new());
    let reconciler = WebhookReconciler::new(pool.clone(), gateway);

    let user_id = seed_user(&pool, "hosted-onboarder").await;
    let email: (Option<String>,) = sqlx::query_as("SELECT email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();

    let account = Account {
        id: format!("acct_{}", user_id.simple()),
        email: email.0,
        charges_enabled: true,
        payouts_enabled: false,
        details_submitted: true,
        requirements: None,
    };

    reconciler
        .process(StripeEvent::AccountUpdated(account.clone()))
        .await
        .expect("account event should process");

    let mirror: rigshare_server::models::PayoutAccount =
        sqlx::query_as("SELECT * FROM payout_accounts WHERE stripe_account_id = $1")
            .bind(&account.id)
            .fetch_one(&pool)
            .await
            .expect("mirror row should exist");
    assert_eq!(mirror.user_id, user_id);
    assert_eq!(mirror.status, PayoutAccountStatus::Restricted);

    // A follow-up update flips the status in place
    let account = Account {
        payouts_enabled: true,
        ..account
    };
    reconciler
        .process(StripeEvent::AccountUpdated(account.clone()))
        .await
        .expect("second account event should process");

    let mirror: rigshare_server::models::PayoutAccount =
        sqlx::query_as("SELECT * FROM payout_accounts WHERE stripe_account_id = $1")
            .bind(&account.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(mirror.status, PayoutAccountStatus::Active);
}
