//! # Payment Provider Adapters
//!
//! Capability trait the payment providers are reached through.
//! Implementations: Stripe (`checkout-stripe`), PayPal (`checkout-paypal`).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ProviderAdapter (trait)                   │
//! │  ├── create_intent()                                        │
//! │  ├── verify_confirmation()                                  │
//! │  └── method()                                               │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                   ┌────────┴────────┐
//!                   │                 │
//!           ┌───────┴───────┐ ┌───────┴───────┐
//!           │ StripeAdapter │ │ PaypalAdapter │
//!           └───────────────┘ └───────────────┘
//! ```
//!
//! Only `PaymentCoordinator` calls adapters. Nothing provider-specific
//! crosses this trait.

use crate::error::{CheckoutError, CheckoutResult};
use crate::money::Currency;
use crate::order::PaymentMethod;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What a provider needs to open a payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    /// Our internal order ID (sent as provider metadata)
    pub order_id: String,
    /// Human-facing order number (shown on provider receipts)
    pub order_number: String,
    /// Amount in minor units
    pub amount: i64,
    pub currency: Currency,
    /// Same value on every retry for the same order
    pub idempotency_key: String,
}

/// Opaque handle the buyer's client hands to the provider's own UI/SDK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    pub method: PaymentMethod,

    /// Provider's id for the intent (payment intent id, PayPal order id)
    pub intent_id: String,

    /// Value the client SDK needs (Stripe client secret, PayPal order id)
    pub client_token: String,

    /// Where to send the buyer for approval, if the provider uses a redirect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Provider's verified view of a confirmation token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPayment {
    /// Provider transaction id; unique per provider
    pub transaction_id: String,
    /// Amount the provider actually captured, in minor units
    pub amount_confirmed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    /// Provider intent the transaction belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    /// Our order id as the provider recorded it when the intent was opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_ref: Option<String>,
}

/// Contract every payment provider implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The payment method tag this adapter serves
    fn method(&self) -> PaymentMethod;

    /// Open (or re-fetch, for a repeated idempotency key) a provider-side
    /// payment intent.
    ///
    /// # Errors
    /// `ProviderUnavailable` for transport/5xx/rate-limit failures,
    /// `ProviderRejected` when the provider refuses the request.
    async fn create_intent(&self, request: &IntentRequest) -> CheckoutResult<ProviderHandle>;

    /// Ask the provider what a confirmation token actually paid.
    ///
    /// # Errors
    /// `ProviderUnavailable` when the provider cannot be reached or the
    /// payment has not settled yet, `ProviderRejected` when the payment
    /// failed or the token is unknown.
    async fn verify_confirmation(&self, token: &str) -> CheckoutResult<VerifiedPayment>;

    /// Provider name (for logging)
    fn provider_name(&self) -> &'static str {
        self.method().as_str()
    }
}

/// Type alias for a shared adapter (dynamic dispatch)
pub type BoxedProviderAdapter = Arc<dyn ProviderAdapter>;

/// Adapters keyed by payment method tag
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<PaymentMethod, BoxedProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own method tag
    pub fn register(&mut self, adapter: BoxedProviderAdapter) {
        self.adapters.insert(adapter.method(), adapter);
    }

    /// Register with builder pattern
    pub fn with_adapter(mut self, adapter: BoxedProviderAdapter) -> Self {
        self.register(adapter);
        self
    }

    /// Adapter for a method
    pub fn get(&self, method: PaymentMethod) -> CheckoutResult<&BoxedProviderAdapter> {
        self.adapters
            .get(&method)
            .ok_or_else(|| CheckoutError::UnsupportedPaymentMethod {
                method: method.to_string(),
            })
    }

    /// List all registered methods
    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.adapters.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }

    pub fn has_method(&self, method: PaymentMethod) -> bool {
        self.adapters.contains_key(&method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.methods().is_empty());
        assert!(matches!(
            registry.get(PaymentMethod::Stripe),
            Err(CheckoutError::UnsupportedPaymentMethod { .. })
        ));
    }

    #[test]
    fn test_register_by_method() {
        let registry = ProviderRegistry::new()
            .with_adapter(Arc::new(MockProvider::new(PaymentMethod::Paypal)))
            .with_adapter(Arc::new(MockProvider::new(PaymentMethod::Stripe)));

        assert_eq!(
            registry.methods(),
            vec![PaymentMethod::Paypal, PaymentMethod::Stripe]
        );
        assert!(registry.has_method(PaymentMethod::Stripe));
        assert_eq!(
            registry.get(PaymentMethod::Paypal).unwrap().provider_name(),
            "paypal"
        );
    }
}
