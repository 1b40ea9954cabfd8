//! # Order Ledger
//!
//! Creates orders from cart snapshots and owns every status change.
//!
//! Each order lives behind its own mutex: all mutations of one order are
//! serialized, different orders never contend. Secondary indexes (order
//! number, provider transaction) sit behind a separate mutex that is only
//! ever taken after an order lock, never before.

use crate::cart::Cart;
use crate::cart_store::CartStore;
use crate::error::{CheckoutError, CheckoutResult};
use crate::lock;
use crate::order::{
    generate_order_number, payment_idempotency_key, Order, OrderEvent, OrderStatus, Payment,
    PaymentMethod, PaymentStatus, ShippingAddress,
};
use crate::pricing::PricingRules;
use crate::provider::VerifiedPayment;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Default)]
struct Indexes {
    by_number: HashMap<String, String>,
    by_transaction: HashMap<(PaymentMethod, String), String>,
}

/// Filter and paging for order listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderQuery {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    /// 1-based
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

/// One page of orders, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Order storage and state machine
pub struct OrderLedger {
    carts: Arc<CartStore>,
    pricing: PricingRules,
    orders: Mutex<HashMap<String, Arc<Mutex<Order>>>>,
    indexes: Mutex<Indexes>,
}

impl OrderLedger {
    pub fn new(carts: Arc<CartStore>, pricing: PricingRules) -> Self {
        Self {
            carts,
            pricing,
            orders: Mutex::new(HashMap::new()),
            indexes: Mutex::new(Indexes::default()),
        }
    }

    pub fn pricing(&self) -> &PricingRules {
        &self.pricing
    }

    fn slot(&self, order_id: &str) -> CheckoutResult<Arc<Mutex<Order>>> {
        lock(&self.orders)
            .get(order_id)
            .cloned()
            .ok_or_else(|| CheckoutError::OrderNotFound {
                order_id: order_id.to_string(),
            })
    }

    /// Snapshot a cart into a new pending order.
    ///
    /// The order owns a deep copy of the lines; later cart mutations never
    /// reach it.
    #[instrument(skip(self, cart, shipping_address, notes), fields(owner_id = %cart.owner_id, revision = cart.revision))]
    pub fn create_order(
        &self,
        cart: &Cart,
        shipping_address: ShippingAddress,
        method: PaymentMethod,
        notes: Option<String>,
    ) -> CheckoutResult<Order> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        shipping_address.validate()?;

        let totals = self.pricing.compute(&cart.lines, &shipping_address)?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let order_number = {
            let mut indexes = lock(&self.indexes);
            let mut number = generate_order_number(now);
            while indexes.by_number.contains_key(&number) {
                number = generate_order_number(now);
            }
            indexes.by_number.insert(number.clone(), id.clone());
            number
        };

        let order = Order {
            id: id.clone(),
            order_number,
            owner_id: cart.owner_id.clone(),
            lines: cart.lines.clone(),
            shipping_address,
            payment: Payment {
                method,
                status: PaymentStatus::Pending,
                amount: totals.total,
                provider_transaction_id: None,
                idempotency_key: payment_idempotency_key(&id),
                payment_details: HashMap::new(),
            },
            currency: self.pricing.currency,
            subtotal: totals.subtotal,
            shipping: totals.shipping,
            tax: totals.tax,
            total: totals.total,
            status: OrderStatus::Pending,
            notes,
            created_at: now,
            updated_at: now,
        };

        lock(&self.orders).insert(id, Arc::new(Mutex::new(order.clone())));

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = order.total,
            method = %method,
            "Order created"
        );

        Ok(order)
    }

    /// Create an order from the owner's current cart.
    ///
    /// With `expected_revision`, fails with `StaleRevision` if the cart moved
    /// on since the buyer last saw it.
    pub fn checkout(
        &self,
        owner_id: &str,
        expected_revision: Option<u64>,
        shipping_address: ShippingAddress,
        method: PaymentMethod,
        notes: Option<String>,
    ) -> CheckoutResult<Order> {
        let cart = self.carts.get(owner_id);
        if let Some(expected) = expected_revision {
            if expected != cart.revision {
                return Err(CheckoutError::StaleRevision {
                    expected,
                    current: cart.revision,
                });
            }
        }
        self.create_order(&cart, shipping_address, method, notes)
    }

    pub fn get(&self, order_id: &str) -> CheckoutResult<Order> {
        let slot = self.slot(order_id)?;
        let order = lock(&slot).clone();
        Ok(order)
    }

    /// Same as `get`, but orders of other owners are reported as not found
    pub fn get_for_owner(&self, order_id: &str, owner_id: &str) -> CheckoutResult<Order> {
        let order = self.get(order_id)?;
        if order.owner_id != owner_id {
            return Err(CheckoutError::OrderNotFound {
                order_id: order_id.to_string(),
            });
        }
        Ok(order)
    }

    pub fn find_by_order_number(&self, order_number: &str) -> CheckoutResult<Order> {
        let id = lock(&self.indexes)
            .by_number
            .get(order_number)
            .cloned()
            .ok_or_else(|| CheckoutError::OrderNotFound {
                order_id: order_number.to_string(),
            })?;
        self.get(&id)
    }

    /// Owner's orders, newest first
    pub fn list_for_owner(&self, owner_id: &str, query: &OrderQuery) -> OrderPage {
        let slots: Vec<_> = lock(&self.orders).values().cloned().collect();
        let mut orders: Vec<Order> = slots
            .iter()
            .map(|slot| lock(slot).clone())
            .filter(|o| o.owner_id == owner_id)
            .filter(|o| query.status.map_or(true, |s| o.status == s))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page = query.page.max(1);
        let page_size = query.page_size.clamp(1, 100);
        let total = orders.len();
        let items = orders
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        OrderPage {
            items,
            total,
            page,
            page_size,
        }
    }

    /// Apply a state machine event. Illegal events leave the order untouched.
    #[instrument(skip(self))]
    pub fn transition(&self, order_id: &str, event: OrderEvent) -> CheckoutResult<Order> {
        let slot = self.slot(order_id)?;
        let mut order = lock(&slot);
        let next = order.applied(event, Utc::now()).map_err(|e| {
            warn!(order_id, status = %order.status, event = %event, "Rejected transition");
            e
        })?;
        Ok(self.commit(&mut order, next))
    }

    /// Replace the stored order and run the paid side effect exactly once
    fn commit(&self, stored: &mut Order, next: Order) -> Order {
        let became_paid = stored.status != OrderStatus::Paid && next.status == OrderStatus::Paid;
        info!(order_id = %next.id, from = %stored.status, to = %next.status, "Order transition");
        *stored = next.clone();
        if became_paid {
            if let Err(e) = self.carts.clear(&next.owner_id) {
                warn!(order_id = %next.id, error = %e, "Could not clear cart of paid order");
            }
        }
        next
    }

    /// Record a provider-verified payment and move the order to `paid`.
    ///
    /// Re-applying an already recorded transaction returns the order
    /// unchanged.
    pub fn apply_confirmation(
        &self,
        order_id: &str,
        verified: &VerifiedPayment,
    ) -> CheckoutResult<Order> {
        if let Some(confirmed_for) = verified.order_ref.as_deref() {
            if confirmed_for != order_id {
                return Err(CheckoutError::ForeignConfirmation {
                    order_id: order_id.to_string(),
                    confirmed_for: confirmed_for.to_string(),
                });
            }
        }

        let slot = self.slot(order_id)?;
        let mut order = lock(&slot);

        match order.payment.provider_transaction_id.as_deref() {
            Some(tx) if tx == verified.transaction_id => {
                debug!(order_id, transaction_id = tx, "Confirmation already recorded");
                return Ok(order.clone());
            }
            Some(_) => {
                return Err(CheckoutError::OrderAlreadyPaid {
                    order_id: order_id.to_string(),
                })
            }
            None => {}
        }

        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::InvalidTransition {
                from: order.status,
                event: OrderEvent::PaymentConfirmed,
            });
        }

        let currency_matches = verified.currency.map_or(true, |c| c == order.currency);
        if !currency_matches || verified.amount_confirmed != order.payment.amount {
            return Err(CheckoutError::AmountMismatch {
                expected: order.payment.amount,
                confirmed: verified.amount_confirmed,
            });
        }

        let mut indexes = lock(&self.indexes);
        let key = (order.payment.method, verified.transaction_id.clone());
        if let Some(other) = indexes.by_transaction.get(&key) {
            if other != order_id {
                return Err(CheckoutError::DuplicateConfirmation {
                    transaction_id: verified.transaction_id.clone(),
                });
            }
        }

        let now = Utc::now();
        let mut next = order.clone();
        next.payment.provider_transaction_id = Some(verified.transaction_id.clone());
        next.payment.status = PaymentStatus::Completed;
        if let Some(intent_id) = &verified.intent_id {
            next.payment
                .payment_details
                .insert("intent_id".to_string(), intent_id.clone());
        }
        let next = next.applied(OrderEvent::PaymentConfirmed, now)?;

        indexes.by_transaction.insert(key, order_id.to_string());
        drop(indexes);

        Ok(self.commit(&mut order, next))
    }

    /// Mark a pending payment as failed. The order itself stays `pending`.
    ///
    /// Returns `None` when there was nothing to mark (payment already settled
    /// or the order has left `pending`).
    pub fn mark_payment_failed(&self, order_id: &str, reason: &str) -> CheckoutResult<Option<Order>> {
        let slot = self.slot(order_id)?;
        let mut order = lock(&slot);

        if order.status != OrderStatus::Pending || order.payment.status != PaymentStatus::Pending {
            return Ok(None);
        }

        order.payment.status = PaymentStatus::Failed;
        order
            .payment
            .payment_details
            .insert("failure_reason".to_string(), reason.to_string());
        order.updated_at = Utc::now();
        warn!(order_id, reason, "Payment marked failed");
        Ok(Some(order.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::NewLine;
    use crate::money::Currency;
    use crate::pricing::{FlatRateShipping, PercentageTax};

    fn address() -> ShippingAddress {
        ShippingAddress {
            recipient: "Ada Lovelace".into(),
            street: "1 Analytical Way".into(),
            city: "London".into(),
            state: "LDN".into(),
            postal_code: "N1".into(),
            country: "GB".into(),
            phone: "+440000".into(),
        }
    }

    fn setup() -> (Arc<CartStore>, OrderLedger) {
        let carts = Arc::new(CartStore::new());
        let rules = PricingRules::new(
            Currency::USD,
            Arc::new(FlatRateShipping {
                rate: 500,
                free_over: None,
            }),
            Arc::new(PercentageTax { rate_bps: 450 }),
        );
        let ledger = OrderLedger::new(carts.clone(), rules);
        (carts, ledger)
    }

    fn fill_cart(carts: &CartStore, owner: &str) -> Cart {
        carts
            .add_line(
                owner,
                NewLine {
                    product_id: "p1".into(),
                    variant_id: "v1".into(),
                    display_name: "Tee".into(),
                    variant_name: "M".into(),
                    unit_price: 2500,
                    quantity: 2,
                },
                None,
            )
            .unwrap()
    }

    fn verified(tx: &str, amount: i64) -> VerifiedPayment {
        VerifiedPayment {
            transaction_id: tx.into(),
            amount_confirmed: amount,
            currency: Some(Currency::USD),
            intent_id: Some("pi_123".into()),
            order_ref: None,
        }
    }

    #[test]
    fn test_create_order_scenario_totals() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger
            .create_order(&cart, address(), PaymentMethod::Stripe, None)
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal, 5000);
        assert_eq!(order.shipping, 500);
        assert_eq!(order.tax, 225);
        assert_eq!(order.total, 5725);
        assert_eq!(order.payment.amount, 5725);
        assert_eq!(order.payment.status, PaymentStatus::Pending);
        assert_eq!(order.payment.idempotency_key, payment_idempotency_key(&order.id));
    }

    #[test]
    fn test_empty_cart_rejected() {
        let (carts, ledger) = setup();
        let cart = carts.get("u");
        assert_eq!(
            ledger.create_order(&cart, address(), PaymentMethod::Stripe, None),
            Err(CheckoutError::EmptyCart)
        );
    }

    #[test]
    fn test_order_is_isolated_from_cart_mutation() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger
            .create_order(&cart, address(), PaymentMethod::Paypal, None)
            .unwrap();

        let line_id = cart.lines[0].line_id.clone();
        carts.set_quantity("u", &line_id, 9, None).unwrap();
        carts
            .add_line(
                "u",
                NewLine {
                    product_id: "p2".into(),
                    variant_id: "v1".into(),
                    display_name: "Hat".into(),
                    variant_name: String::new(),
                    unit_price: 1500,
                    quantity: 1,
                },
                None,
            )
            .unwrap();

        let stored = ledger.get(&order.id).unwrap();
        assert_eq!(stored.lines, order.lines);
        assert_eq!(stored.totals(), order.totals());
        assert_eq!(stored.lines[0].quantity, 2);
    }

    #[test]
    fn test_checkout_with_stale_revision() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let err = ledger
            .checkout("u", Some(cart.revision - 1), address(), PaymentMethod::Stripe, None)
            .unwrap_err();
        assert!(matches!(err, CheckoutError::StaleRevision { .. }));

        assert!(ledger
            .checkout("u", Some(cart.revision), address(), PaymentMethod::Stripe, None)
            .is_ok());
    }

    #[test]
    fn test_order_numbers_are_unique() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let a = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        let b = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        assert_ne!(a.order_number, b.order_number);
        assert_eq!(ledger.find_by_order_number(&b.order_number).unwrap().id, b.id);
    }

    #[test]
    fn test_cancel_pending_keeps_cart() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();

        let cancelled = ledger.transition(&order.id, OrderEvent::Cancel).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = ledger
            .apply_confirmation(&order.id, &verified("pi_tx", 5725))
            .unwrap_err();
        assert_eq!(
            err,
            CheckoutError::InvalidTransition {
                from: OrderStatus::Cancelled,
                event: OrderEvent::PaymentConfirmed
            }
        );
        assert_eq!(carts.get("u"), cart);
    }

    #[test]
    fn test_confirmation_clears_cart_once() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();

        let first = ledger.apply_confirmation(&order.id, &verified("pi_tx", 5725)).unwrap();
        let second = ledger.apply_confirmation(&order.id, &verified("pi_tx", 5725)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, OrderStatus::Paid);
        assert_eq!(first.payment.status, PaymentStatus::Completed);
        assert_eq!(first.payment.payment_details.get("intent_id").map(String::as_str), Some("pi_123"));

        let after = carts.get("u");
        assert!(after.is_empty());
        assert_eq!(after.revision, cart.revision + 1);
    }

    #[test]
    fn test_different_token_on_paid_order() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        ledger.apply_confirmation(&order.id, &verified("pi_a", 5725)).unwrap();

        assert_eq!(
            ledger.apply_confirmation(&order.id, &verified("pi_b", 5725)),
            Err(CheckoutError::OrderAlreadyPaid {
                order_id: order.id.clone()
            })
        );
    }

    #[test]
    fn test_confirmation_for_another_order_is_refused() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let a = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        let b = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();

        let paid_for_a = VerifiedPayment {
            order_ref: Some(a.id.clone()),
            ..verified("pi_a", 5725)
        };
        assert_eq!(
            ledger.apply_confirmation(&b.id, &paid_for_a),
            Err(CheckoutError::ForeignConfirmation {
                order_id: b.id.clone(),
                confirmed_for: a.id.clone()
            })
        );
        assert_eq!(ledger.get(&b.id).unwrap().status, OrderStatus::Pending);
        assert!(!carts.get("u").is_empty());

        let paid = ledger.apply_confirmation(&a.id, &paid_for_a).unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
    }

    #[test]
    fn test_amount_mismatch_leaves_order_pending() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();

        assert_eq!(
            ledger.apply_confirmation(&order.id, &verified("pi_tx", 5000)),
            Err(CheckoutError::AmountMismatch {
                expected: 5725,
                confirmed: 5000
            })
        );
        let stored = ledger.get(&order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.payment.provider_transaction_id, None);
    }

    #[test]
    fn test_transaction_reuse_across_orders() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let a = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        let b = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();

        ledger.apply_confirmation(&a.id, &verified("pi_shared", 5725)).unwrap();
        assert_eq!(
            ledger.apply_confirmation(&b.id, &verified("pi_shared", 5725)),
            Err(CheckoutError::DuplicateConfirmation {
                transaction_id: "pi_shared".into()
            })
        );
        assert_eq!(ledger.get(&b.id).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn test_terminal_orders_reject_all_events() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        ledger.transition(&order.id, OrderEvent::Cancel).unwrap();

        for event in OrderEvent::ALL {
            assert!(matches!(
                ledger.transition(&order.id, event),
                Err(CheckoutError::InvalidTransition { .. })
            ));
            assert_eq!(ledger.get(&order.id).unwrap().status, OrderStatus::Cancelled);
        }
    }

    #[test]
    fn test_fulfillment_and_refund() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        ledger.apply_confirmation(&order.id, &verified("pi_tx", 5725)).unwrap();

        let processing = ledger.transition(&order.id, OrderEvent::BeginFulfillment).unwrap();
        assert_eq!(processing.status, OrderStatus::Processing);
        assert!(ledger.transition(&order.id, OrderEvent::Cancel).is_err());

        let refunded = ledger.transition(&order.id, OrderEvent::Refund).unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert_eq!(refunded.payment.status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_mark_payment_failed() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let order = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();

        let failed = ledger.mark_payment_failed(&order.id, "timeout").unwrap().unwrap();
        assert_eq!(failed.status, OrderStatus::Pending);
        assert_eq!(failed.payment.status, PaymentStatus::Failed);
        assert!(ledger.mark_payment_failed(&order.id, "timeout").unwrap().is_none());

        // A late confirmation still completes the order
        let paid = ledger.apply_confirmation(&order.id, &verified("pi_tx", 5725)).unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
    }

    #[test]
    fn test_list_for_owner() {
        let (carts, ledger) = setup();
        let cart = fill_cart(&carts, "u");
        let first = ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        for _ in 0..4 {
            ledger.create_order(&cart, address(), PaymentMethod::Stripe, None).unwrap();
        }
        ledger.transition(&first.id, OrderEvent::Cancel).unwrap();
        let other = fill_cart(&carts, "someone-else");
        ledger.create_order(&other, address(), PaymentMethod::Stripe, None).unwrap();

        let page = ledger.list_for_owner(
            "u",
            &OrderQuery {
                status: None,
                page: 2,
                page_size: 2,
            },
        );
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);

        let cancelled = ledger.list_for_owner(
            "u",
            &OrderQuery {
                status: Some(OrderStatus::Cancelled),
                ..OrderQuery::default()
            },
        );
        assert_eq!(cancelled.total, 1);
        assert_eq!(cancelled.items[0].id, first.id);

        assert!(ledger.get_for_owner(&first.id, "someone-else").is_err());
    }
}
