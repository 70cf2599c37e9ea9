//! Payment gateway adapter
//!
//! Wraps the payment processor's REST API behind a small trait so the escrow
//! release engine and the webhook reconciler can be exercised against an
//! in-memory gateway in tests. Pure request/response, no state.

pub mod client;
pub mod types;
pub mod webhook;

pub use client::StripeClient;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

/// Gateway call failure
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure (connection, timeout). Retrying may succeed.
    #[error("gateway transport error: {0}")]
    Http(String),

    /// The gateway returned a structured rejection (e.g. insufficient funds,
    /// invalid destination account). Retrying with the same input will fail
    /// the same way.
    #[error("gateway rejected the request: {0}")]
    Api(String),

    /// The gateway answered with a body we could not decode
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether the failure is deterministic for identical input
    pub fn is_permanent(&self) -> bool {
        matches!(self, GatewayError::Api(_))
    }
}

/// Transfer (payout) creation parameters
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    /// Connected account receiving the funds
    pub destination: String,
    /// Original charge funding the transfer, so the payout reconciles back
    /// to the capture
    pub source_transaction: String,
    pub booking_id: String,
    pub description: String,
}

/// Refund creation parameters
#[derive(Debug, Clone)]
pub struct RefundRequest {
    /// Amount in minor currency units
    pub amount: i64,
    /// Original payment intent being refunded
    pub payment_intent: String,
    pub booking_id: String,
    pub reason: Option<String>,
}

/// Minimal payment-provider surface the escrow core needs
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, GatewayError>;

    async fn create_refund(&self, request: RefundRequest) -> Result<Refund, GatewayError>;
}
