//! Webhook signature verification and event parsing
//!
//! The gateway signs each delivery with an HMAC-SHA256 over
//! `"{timestamp}.{raw_body}"`, carried in the signature header as
//! `t=<timestamp>,v1=<hex digest>`. Verification must happen on the raw body
//! before anything is parsed or persisted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::types::{EventEnvelope, StripeEvent};

type HmacSha256 = Hmac<Sha256>;

/// Header name carrying the signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,

    #[error("signature timestamp outside tolerance window")]
    TimestampOutOfTolerance,

    #[error("signature mismatch")]
    Mismatch,

    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Parsed pieces of the signature header
struct SignatureHeader {
    timestamp: i64,
    v1: String,
}

fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut v1: Option<String> = None;

    for part in header.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() != 2 {
            continue;
        }
        match kv[0].trim() {
            "t" => timestamp = kv[1].trim().parse::<i64>().ok(),
            "v1" => v1 = Some(kv[1].trim().to_string()),
            _ => {}
        }
    }

    Ok(SignatureHeader {
        timestamp: timestamp.ok_or(SignatureError::Malformed)?,
        v1: v1.ok_or(SignatureError::Malformed)?,
    })
}

/// Verify the signature over the raw payload
///
/// `now` is injected so the tolerance window is testable; pass the current
/// unix timestamp in production. A tolerance of zero disables the window
/// check.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    if tolerance_seconds > 0 && (now - parsed.timestamp).abs() > tolerance_seconds {
        tracing::warn!(
            timestamp = parsed.timestamp,
            now,
            "Webhook signature timestamp outside tolerance"
        );
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    // The shared secret is used verbatim minus its "whsec_" prefix
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", parsed.timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| SignatureError::Malformed)?;
    mac.update(signed_payload.as_bytes());

    let expected = hex::decode(&parsed.v1).map_err(|_| SignatureError::Mismatch)?;
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Verify the signature, then parse the raw body into a typed event
pub fn verify_and_parse(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<StripeEvent, SignatureError> {
    verify_signature(payload, header, secret, tolerance_seconds, now)?;

    let envelope: EventEnvelope = serde_json::from_str(payload)
        .map_err(|e| SignatureError::InvalidPayload(e.to_string()))?;

    StripeEvent::from_envelope(envelope).map_err(|e| SignatureError::InvalidPayload(e.to_string()))
}

/// Compute a signature header for a payload. Test helper, also handy for
/// local gateway simulation.
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signed_payload.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());

    format!("t={},v1={}", timestamp, digest)
}
