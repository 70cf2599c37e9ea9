//! Minimal payment-gateway DTOs and the typed webhook event union

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hosted checkout session, as delivered in webhook payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// May be absent when the session was created before the intent existed
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    /// Read an integer amount (minor units) from session metadata
    pub fn metadata_amount(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.parse::<i64>().ok())
    }
}

/// PaymentIntent minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub latest_charge: Option<String>,
}

/// Charge minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    pub amount: i64,
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub refunds: Option<RefundList>,
}

impl Charge {
    /// Reason recorded on the most recent refund, if any
    pub fn latest_refund_reason(&self) -> Option<String> {
        self.refunds
            .as_ref()
            .and_then(|list| list.data.first())
            .and_then(|refund| refund.reason.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundList {
    #[serde(default)]
    pub data: Vec<Refund>,
}

/// Transfer (payout to a connected account) minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    /// Connected account ID
    pub destination: String,
    #[serde(default)]
    pub source_transaction: Option<String>,
}

/// Refund minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

/// Connected account minimal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub requirements: Option<AccountRequirements>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRequirements {
    #[serde(default)]
    pub currently_due: Vec<String>,
}

/// Raw webhook event envelope: `{ id, type, data: { object } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
    #[serde(default)]
    pub created: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Typed webhook event
///
/// Each consumed gateway notification becomes its own variant so the
/// reconciler's dispatch is exhaustive at compile time. Event types the core
/// does not consume land in `Ignored` and are acknowledged without side
/// effects.
#[derive(Debug, Clone)]
pub enum StripeEvent {
    CheckoutSessionCompleted(CheckoutSession),
    CheckoutSessionExpired(CheckoutSession),
    PaymentIntentSucceeded(PaymentIntent),
    PaymentIntentFailed(PaymentIntent),
    ChargeRefunded(Charge),
    TransferCreated(Transfer),
    AccountUpdated(Account),
    Ignored { event_type: String },
}

impl StripeEvent {
    /// Parse the envelope's loosely-typed payload into the matching variant
    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self, serde_json::Error> {
        let object = envelope.data.object;

        let event = match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                StripeEvent::CheckoutSessionCompleted(serde_json::from_value(object)?)
            }
            "checkout.session.expired" => {
                StripeEvent::CheckoutSessionExpired(serde_json::from_value(object)?)
            }
            "payment_intent.succeeded" => {
                StripeEvent::PaymentIntentSucceeded(serde_json::from_value(object)?)
            }
            "payment_intent.payment_failed" => {
                StripeEvent::PaymentIntentFailed(serde_json::from_value(object)?)
            }
            "charge.refunded" => StripeEvent::ChargeRefunded(serde_json::from_value(object)?),
            "transfer.created" => StripeEvent::TransferCreated(serde_json::from_value(object)?),
            "account.updated" => StripeEvent::AccountUpdated(serde_json::from_value(object)?),
            other => StripeEvent::Ignored {
                event_type: other.to_string(),
            },
        };

        Ok(event)
    }

    /// Event type string, for logging
    pub fn type_name(&self) -> &str {
        match self {
            StripeEvent::CheckoutSessionCompleted(_) => "checkout.session.completed",
            StripeEvent::CheckoutSessionExpired(_) => "checkout.session.expired",
            StripeEvent::PaymentIntentSucceeded(_) => "payment_intent.succeeded",
            StripeEvent::PaymentIntentFailed(_) => "payment_intent.payment_failed",
            StripeEvent::ChargeRefunded(_) => "charge.refunded",
            StripeEvent::TransferCreated(_) => "transfer.created",
            StripeEvent::AccountUpdated(_) => "account.updated",
            StripeEvent::Ignored { event_type } => event_type,
        }
    }
}
