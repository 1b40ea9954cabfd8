//! # Payment Coordinator
//!
//! Drives one order's payment through one provider adapter:
//!
//! ```text
//! initiate(order, method) ──► adapter.create_intent(idempotency_key)
//!                                      │
//!                             buyer pays at the provider
//!                                      │
//! confirm(order, token) ────► adapter.verify_confirmation(token)
//!                                      │
//!                           ledger.apply_confirmation ──► paid, cart cleared
//! ```
//!
//! Provider calls never run under an order lock. The ledger re-checks
//! everything when the verified result is committed.

use crate::error::{CheckoutError, CheckoutResult};
use crate::ledger::OrderLedger;
use crate::lock;
use crate::order::{Order, OrderEvent, OrderStatus, PaymentMethod};
use crate::provider::{IntentRequest, ProviderHandle, ProviderRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Coordinator tuning
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Upper bound on a single provider call
    pub verify_timeout: Duration,
    /// How long an initiated payment may stay unconfirmed
    pub confirmation_window: chrono::Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_secs(15),
            confirmation_window: chrono::Duration::minutes(30),
        }
    }
}

/// An initiated payment awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub order_id: String,
    pub handle: ProviderHandle,
    pub expires_at: DateTime<Utc>,
}

pub struct PaymentCoordinator {
    ledger: Arc<OrderLedger>,
    providers: ProviderRegistry,
    config: CoordinatorConfig,
    intents: Mutex<HashMap<String, PendingIntent>>,
}

impl PaymentCoordinator {
    pub fn new(
        ledger: Arc<OrderLedger>,
        providers: ProviderRegistry,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            ledger,
            providers,
            config,
            intents: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<OrderLedger> {
        &self.ledger
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Run a provider call under the configured timeout
    async fn bounded<T>(
        &self,
        provider: &str,
        call: impl Future<Output = CheckoutResult<T>>,
    ) -> CheckoutResult<T> {
        match tokio::time::timeout(self.config.verify_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CheckoutError::ProviderUnavailable {
                provider: provider.to_string(),
                message: format!(
                    "no response within {}s",
                    self.config.verify_timeout.as_secs()
                ),
            }),
        }
    }

    /// Open a provider-side payment for a pending order.
    ///
    /// Every call for the same order sends the same idempotency key, so
    /// retries never create a second charge. Nothing on the order changes.
    #[instrument(skip(self))]
    pub async fn initiate(
        &self,
        order_id: &str,
        method: PaymentMethod,
    ) -> CheckoutResult<ProviderHandle> {
        let order = self.ledger.get(order_id)?;

        if order.payment.provider_transaction_id.is_some() {
            return Err(CheckoutError::OrderAlreadyPaid {
                order_id: order.id,
            });
        }
        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::InvalidTransition {
                from: order.status,
                event: OrderEvent::PaymentConfirmed,
            });
        }
        if order.payment.method != method {
            return Err(CheckoutError::PaymentMethodMismatch {
                expected: order.payment.method,
                requested: method,
            });
        }

        let adapter = self.providers.get(method)?;
        let request = IntentRequest {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            amount: order.payment.amount,
            currency: order.currency,
            idempotency_key: order.payment.idempotency_key.clone(),
        };

        let handle = self
            .bounded(adapter.provider_name(), adapter.create_intent(&request))
            .await
            .map_err(|e| {
                warn!(order_id, provider = adapter.provider_name(), error = %e, "Intent creation failed");
                e
            })?;

        let expires_at = Utc::now() + self.config.confirmation_window;
        lock(&self.intents)
            .entry(order.id.clone())
            .and_modify(|pending| pending.handle = handle.clone())
            .or_insert_with(|| PendingIntent {
                order_id: order.id.clone(),
                handle: handle.clone(),
                expires_at,
            });

        info!(
            order_id,
            provider = adapter.provider_name(),
            intent_id = %handle.intent_id,
            amount = request.amount,
            "Payment initiated"
        );

        Ok(handle)
    }

    /// Verify a confirmation token with the provider and mark the order paid.
    ///
    /// Confirming the same token twice returns the paid order both times;
    /// the cart is cleared once. Orders that can no longer be paid are
    /// refused before the provider is asked, since verifying may capture.
    #[instrument(skip(self, token))]
    pub async fn confirm(&self, order_id: &str, token: &str) -> CheckoutResult<Order> {
        let order = self.ledger.get(order_id)?;

        if let Some(recorded) = order.payment.provider_transaction_id.as_deref() {
            let same_payment = recorded == token
                || order.payment.payment_details.get("intent_id").map(String::as_str) == Some(token);
            if same_payment {
                return Ok(order);
            }
            warn!(order_id, "Confirmation for an order paid by another transaction");
            return Err(CheckoutError::OrderAlreadyPaid {
                order_id: order.id,
            });
        }
        if order.status != OrderStatus::Pending {
            warn!(order_id, status = %order.status, "Confirmation for an order that is no longer payable");
            return Err(CheckoutError::InvalidTransition {
                from: order.status,
                event: OrderEvent::PaymentConfirmed,
            });
        }

        let adapter = self.providers.get(order.payment.method)?;
        let provider = adapter.provider_name();

        let verified = match self
            .bounded(provider, adapter.verify_confirmation(token))
            .await
        {
            Ok(verified) => verified,
            Err(e @ CheckoutError::ProviderRejected { .. }) => {
                warn!(order_id, provider, error = %e, "Provider rejected payment");
                self.ledger.mark_payment_failed(order_id, &e.to_string())?;
                lock(&self.intents).remove(order_id);
                return Err(e);
            }
            Err(e) => {
                warn!(order_id, provider, error = %e, "Payment verification failed");
                return Err(e);
            }
        };

        match self.ledger.apply_confirmation(order_id, &verified) {
            Ok(order) => {
                lock(&self.intents).remove(order_id);
                info!(
                    order_id,
                    provider,
                    transaction_id = %verified.transaction_id,
                    "Payment confirmed"
                );
                Ok(order)
            }
            Err(e) if e.is_security_relevant() => {
                error!(
                    order_id,
                    provider,
                    transaction_id = %verified.transaction_id,
                    amount_confirmed = verified.amount_confirmed,
                    error = %e,
                    "Payment confirmation refused"
                );
                Err(e)
            }
            Err(e) => {
                warn!(order_id, provider, error = %e, "Payment confirmation refused");
                Err(e)
            }
        }
    }

    /// Record a provider-reported failure. The order stays `pending`.
    #[instrument(skip(self))]
    pub fn record_failure(&self, order_id: &str, reason: &str) -> CheckoutResult<Option<Order>> {
        lock(&self.intents).remove(order_id);
        self.ledger.mark_payment_failed(order_id, reason)
    }

    /// Fail every intent whose confirmation window closed before `now`.
    ///
    /// Returns the ids of the orders whose payment was marked failed.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = {
            let mut intents = lock(&self.intents);
            let ids: Vec<String> = intents
                .values()
                .filter(|p| p.expires_at <= now)
                .map(|p| p.order_id.clone())
                .collect();
            for id in &ids {
                intents.remove(id);
            }
            ids
        };

        expired
            .into_iter()
            .filter(|id| match self.ledger.mark_payment_failed(id, "confirmation window expired") {
                Ok(marked) => marked.is_some(),
                Err(e) => {
                    warn!(order_id = %id, error = %e, "Could not expire payment");
                    false
                }
            })
            .collect()
    }

    pub fn pending_intent(&self, order_id: &str) -> Option<PendingIntent> {
        lock(&self.intents).get(order_id).cloned()
    }
}
