//! Shared test fixtures: an in-memory payment gateway and database seeding
//! helpers. Database-backed tests are gated behind TEST_DATABASE_URL and
//! marked #[ignore].

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use rigshare_server::stripe::{
    GatewayError, PaymentGateway, PaymentIntent, Refund, RefundRequest, Transfer, TransferRequest,
};

/// In-memory gateway recording every call it receives
pub struct MockGateway {
    pub transfers: Mutex<Vec<TransferRequest>>,
    pub refunds: Mutex<Vec<RefundRequest>>,
    /// When set, transfer/refund calls fail with a deterministic rejection
    pub fail_next: AtomicBool,
    counter: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            transfers: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        Ok(PaymentIntent {
            id: id.to_string(),
            status: "succeeded".to_string(),
            amount: 0,
            currency: "usd".to_string(),
            latest_charge: Some(format!("ch_for_{}", id)),
        })
    }

    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Api("insufficient funds".to_string()));
        }

        let transfer = Transfer {
            id: self.next_id("tr"),
            amount: request.amount,
            currency: request.currency.clone(),
            destination: request.destination.clone(),
            source_transaction: Some(request.source_transaction.clone()),
        };
        self.transfers.lock().unwrap().push(request);
        Ok(transfer)
    }

    async fn create_refund(&self, request: RefundRequest) -> Result<Refund, GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Api("charge already refunded".to_string()));
        }

        let refund = Refund {
            id: self.next_id("re"),
            amount: request.amount,
            status: Some("succeeded".to_string()),
            reason: request.reason.clone(),
            payment_intent: Some(request.payment_intent.clone()),
        };
        self.refunds.lock().unwrap().push(request);
        Ok(refund)
    }
}

/// Connect to the test database and apply migrations
pub async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/rigshare_test".to_string());

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// A fully seeded paid booking: users, payout account, booking and a held
/// escrow row
pub struct SeededBooking {
    pub booking_id: Uuid,
    pub owner_id: Uuid,
    pub renter_id: Uuid,
    pub charge_id: String,
    pub intent_id: String,
}

pub async fn seed_user(pool: &PgPool, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, name) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(format!("{}+{}@example.com", email, id.simple()))
        .bind(email)
        .execute(pool)
        .await
        .expect("Failed to insert user");
    id
}

pub async fn seed_payout_account(pool: &PgPool, user_id: Uuid) -> String {
    let account_id = format!("acct_{}", Uuid::new_v4().simple());
    sqlx::query(
        "INSERT INTO payout_accounts (
            id, user_id, stripe_account_id, status, charges_enabled,
            payouts_enabled, details_submitted
        ) VALUES ($1, $2, $3, 'active', TRUE, TRUE, TRUE)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&account_id)
    .execute(pool)
    .await
    .expect("Failed to insert payout account");
    account_id
}

/// Seed a paid, active booking with a held escrow of 200.00 rental and
/// 100.00 deposit
pub async fn seed_held_booking(pool: &PgPool) -> SeededBooking {
    seed_held_booking_with_amounts(pool, 20000, 10000).await
}

pub async fn seed_held_booking_with_amounts(
    pool: &PgPool,
    rental_amount: i64,
    deposit_amount: i64,
) -> SeededBooking {
    let owner_id = seed_user(pool, "owner").await;
    let renter_id = seed_user(pool, "renter").await;
    seed_payout_account(pool, owner_id).await;

    let booking_id = Uuid::new_v4();
    let intent_id = format!("pi_{}", booking_id.simple());
    let charge_id = format!("ch_{}", booking_id.simple());
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO bookings (
            id, listing_id, owner_id, renter_id, rental_amount, deposit_amount,
            platform_fee, total_amount, start_date, end_date, status,
            payment_status, stripe_payment_intent_id
        ) VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $9, 'active', 'completed', $10)",
    )
    .bind(booking_id)
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(renter_id)
    .bind(rental_amount)
    .bind(deposit_amount)
    .bind(rental_amount + deposit_amount)
    .bind(now - Duration::days(3))
    .bind(now)
    .bind(&intent_id)
    .execute(pool)
    .await
    .expect("Failed to insert booking");

    sqlx::query(
        "INSERT INTO escrow_transactions (
            id, booking_id, rental_amount, deposit_amount, platform_fee,
            stripe_payment_intent_id, stripe_charge_id, escrow_status, held_until
        ) VALUES ($1, $2, $3, $4, 0, $5, $6, 'held', $7)",
    )
    .bind(Uuid::new_v4())
    .bind(booking_id)
    .bind(rental_amount)
    .bind(deposit_amount)
    .bind(&intent_id)
    .bind(&charge_id)
    .bind(now)
    .execute(pool)
    .await
    .expect("Failed to insert escrow transaction");

    SeededBooking {
        booking_id,
        owner_id,
        renter_id,
        charge_id,
        intent_id,
    }
}

pub async fn booking_row(pool: &PgPool, booking_id: Uuid) -> rigshare_server::models::Booking {
    sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_one(pool)
        .await
        .expect("Booking row missing")
}

pub async fn escrow_row(
    pool: &PgPool,
    booking_id: Uuid,
) -> rigshare_server::escrow::EscrowTransaction {
    sqlx::query_as("SELECT * FROM escrow_transactions WHERE booking_id = $1")
        .bind(booking_id)
        .fetch_one(pool)
        .await
        .expect("Escrow row missing")
}
