//! Scripted in-memory provider for tests

use crate::error::{CheckoutError, CheckoutResult};
use crate::lock;
use crate::order::PaymentMethod;
use crate::provider::{IntentRequest, ProviderAdapter, ProviderHandle, VerifiedPayment};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct MockState {
    intents: HashMap<String, ProviderHandle>,
    /// intent id -> order id it was opened for
    orders: HashMap<String, String>,
    seen_keys: Vec<String>,
    verifications: HashMap<String, CheckoutResult<VerifiedPayment>>,
    create_failure: Option<CheckoutError>,
    verify_calls: usize,
}

/// Provider that dedupes intents by idempotency key and answers
/// verifications from a script.
pub struct MockProvider {
    method: PaymentMethod,
    state: Mutex<MockState>,
    verify_delay: Option<Duration>,
}

impl MockProvider {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            state: Mutex::new(MockState::default()),
            verify_delay: None,
        }
    }

    /// Sleep before answering every verification
    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = Some(delay);
        self
    }

    /// Script a successful verification for `token`
    ///
    /// Tokens naming an intent this provider created carry that intent's
    /// order id, like a real provider's metadata.
    pub fn succeed(&self, token: &str, transaction_id: &str, amount: i64) {
        let mut state = lock(&self.state);
        let verified = VerifiedPayment {
            transaction_id: transaction_id.to_string(),
            amount_confirmed: amount,
            currency: None,
            intent_id: Some(token.to_string()),
            order_ref: state.orders.get(token).cloned(),
        };
        state.verifications.insert(token.to_string(), Ok(verified));
    }

    /// Script a failed verification for `token`
    pub fn fail(&self, token: &str, error: CheckoutError) {
        lock(&self.state)
            .verifications
            .insert(token.to_string(), Err(error));
    }

    /// Make the next `create_intent` calls fail
    pub fn fail_create(&self, error: Option<CheckoutError>) {
        lock(&self.state).create_failure = error;
    }

    pub fn seen_keys(&self) -> Vec<String> {
        lock(&self.state).seen_keys.clone()
    }

    pub fn intent_count(&self) -> usize {
        lock(&self.state).intents.len()
    }

    pub fn verify_calls(&self) -> usize {
        lock(&self.state).verify_calls
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn create_intent(&self, request: &IntentRequest) -> CheckoutResult<ProviderHandle> {
        let mut state = lock(&self.state);
        state.seen_keys.push(request.idempotency_key.clone());
        if let Some(error) = state.create_failure.clone() {
            return Err(error);
        }

        let count = state.intents.len();
        let method = self.method;
        let handle = state
            .intents
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| {
                let intent_id = format!("{}_intent_{}", method.as_str(), count + 1);
                ProviderHandle {
                    method,
                    client_token: format!("{intent_id}_secret"),
                    intent_id,
                    approval_url: None,
                    created_at: Utc::now(),
                }
            })
            .clone();
        state
            .orders
            .insert(handle.intent_id.clone(), request.order_id.clone());
        Ok(handle)
    }

    async fn verify_confirmation(&self, token: &str) -> CheckoutResult<VerifiedPayment> {
        if let Some(delay) = self.verify_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.verify_calls += 1;
        state
            .verifications
            .get(token)
            .cloned()
            .unwrap_or_else(|| {
                Err(CheckoutError::ProviderRejected {
                    provider: self.method.to_string(),
                    message: format!("unknown token {token}"),
                })
            })
    }
}
