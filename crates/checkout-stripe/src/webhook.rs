//! # Stripe Webhook Handling
//!
//! Signature verification and parsing of the payment intent events the
//! checkout flow reacts to. Everything else is acknowledged and ignored.

use checkout_core::{constant_time_eq, CheckoutError, CheckoutResult};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a signed payload stays acceptable
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// What a payment intent event means for the order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeEventKind {
    Succeeded,
    Failed { reason: String },
    Ignored(String),
}

/// A verified webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripePaymentEvent {
    pub event_id: String,
    pub kind: StripeEventKind,
    /// Payment intent id, the confirmation token for `confirm`
    pub intent_id: Option<String>,
    /// Our order id, from the intent metadata
    pub order_id: Option<String>,
}

/// Verifies `Stripe-Signature` headers
#[derive(Debug, Clone)]
pub struct StripeWebhookVerifier {
    secret: String,
}

impl StripeWebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify the signature and parse the event
    pub fn verify(&self, payload: &[u8], signature: &str) -> CheckoutResult<StripePaymentEvent> {
        self.verify_at(payload, signature, Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        payload: &[u8],
        signature: &str,
        now: i64,
    ) -> CheckoutResult<StripePaymentEvent> {
        let header = parse_signature_header(signature)?;

        if (now - header.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(rejected("Timestamp outside tolerance"));
        }

        let mut signed_payload = format!("{}.", header.timestamp).into_bytes();
        signed_payload.extend_from_slice(payload);
        let expected = compute_hmac_sha256(&self.secret, &signed_payload)?;

        let valid = header
            .signatures
            .iter()
            .any(|sig| constant_time_eq(sig, &expected));
        if !valid {
            return Err(rejected("Signature mismatch"));
        }

        let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            CheckoutError::InvalidRequest(format!("Failed to parse webhook: {}", e))
        })?;

        debug!("Verified Stripe webhook: type={}", event.event_type);
        Ok(event.into_payment_event())
    }
}

fn rejected(reason: &str) -> CheckoutError {
    CheckoutError::InvalidRequest(format!("Webhook verification failed: {}", reason))
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Map<String, serde_json::Value>,
}

impl StripeWebhookEvent {
    fn into_payment_event(self) -> StripePaymentEvent {
        let object = &self.data.object;
        let str_field = |key: &str| object.get(key).and_then(|v| v.as_str()).map(String::from);

        let kind = match self.event_type.as_str() {
            "payment_intent.succeeded" => StripeEventKind::Succeeded,
            "payment_intent.payment_failed" => StripeEventKind::Failed {
                reason: object
                    .get("last_payment_error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("payment failed")
                    .to_string(),
            },
            other => StripeEventKind::Ignored(other.to_string()),
        };

        let order_id = object
            .get("metadata")
            .and_then(|m| m.get("order_id"))
            .and_then(|v| v.as_str())
            .map(String::from);

        StripePaymentEvent {
            intent_id: str_field("id"),
            order_id,
            kind,
            event_id: self.id,
        }
    }
}

// =============================================================================
// Signature primitives
// =============================================================================

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> CheckoutResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| rejected("Missing timestamp in signature"))?;

    if signatures.is_empty() {
        return Err(rejected("No v1 signature found"));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_hmac_sha256(secret: &str, message: &[u8]) -> CheckoutResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CheckoutError::Configuration(format!("webhook secret: {}", e)))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a valid `Stripe-Signature` header (for tests and local tooling)
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> CheckoutResult<String> {
    let mut signed_payload = format!("{}.", timestamp).into_bytes();
    signed_payload.extend_from_slice(payload);
    let sig = compute_hmac_sha256(secret, &signed_payload)?;
    Ok(format!("t={},v1={}", timestamp, sig))
}
