//! # checkout-core
//!
//! Order and payment orchestration for the storefront.
//!
//! This crate provides:
//! - `CartStore` - owner-keyed carts with revision-based optimistic concurrency
//! - `PriceEngine` - integer minor-unit totals with injected shipping/tax rules
//! - `OrderLedger` - immutable order snapshots and the order status state machine
//! - `PaymentCoordinator` - drives one order's payment through one provider
//! - `ProviderAdapter` trait for implementing payment providers
//! - `CheckoutError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkout_core::{CartStore, NewLine, OrderLedger, PaymentCoordinator, PaymentMethod};
//!
//! let cart = carts.add_line("user-1", line, None)?;
//! let order = ledger.create_order(&cart, address, PaymentMethod::Stripe, None)?;
//!
//! // Hand the client secret to the browser SDK
//! let handle = coordinator.initiate(&order.id, PaymentMethod::Stripe).await?;
//!
//! // Later, from the success redirect or the provider webhook
//! let paid = coordinator.confirm(&order.id, &token).await?;
//! ```

pub mod cart;
pub mod cart_store;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod money;
pub mod order;
pub mod pricing;
pub mod provider;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports for convenience
pub use cart::{Cart, CartLine, NewLine};
pub use cart_store::{CartStore, Reconciliation};
pub use coordinator::{CoordinatorConfig, PaymentCoordinator};
pub use error::{BuyerPaymentState, CheckoutError, CheckoutResult};
pub use ledger::{OrderLedger, OrderPage, OrderQuery};
pub use money::Currency;
pub use order::{
    payment_idempotency_key, Order, OrderEvent, OrderStatus, Payment, PaymentMethod,
    PaymentStatus, ShippingAddress,
};
pub use pricing::{
    FlatRateShipping, PercentageTax, PriceEngine, PricingConfig, PricingRules, ShippingRule,
    TaxRule, Totals,
};
pub use provider::{
    BoxedProviderAdapter, IntentRequest, ProviderAdapter, ProviderHandle, ProviderRegistry,
    VerifiedPayment,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
/// Every critical section commits with a single assignment, so the data is
/// never half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Compare secrets without an early exit on the first differing byte
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}
