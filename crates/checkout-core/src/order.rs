//! # Order Types
//!
//! Orders, payments and the order status state machine.
//!
//! ```text
//!  pending ──paymentConfirmed──▶ paid ──beginFulfillment──▶ processing ──ship──▶ shipped ──deliver──▶ delivered
//!     │                           │  │                          │
//!     └──cancel──▶ cancelled ◀────┘  └──refund──▶ refunded ◀────┘
//! ```

use crate::cart::CartLine;
use crate::error::{CheckoutError, CheckoutResult};
use crate::money::Currency;
use crate::pricing::Totals;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;

/// Payment provider tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Card payments through Stripe PaymentIntents
    Stripe,
    /// PayPal Orders
    Paypal,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Paypal => "paypal",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stripe" => Ok(PaymentMethod::Stripe),
            "paypal" => Ok(PaymentMethod::Paypal),
            other => Err(CheckoutError::UnsupportedPaymentMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// Status of the payment attached to an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Payment record attached to an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Provider this order pays through
    pub method: PaymentMethod,

    pub status: PaymentStatus,

    /// Always equals the order total
    pub amount: i64,

    /// Set once, when the provider confirms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_transaction_id: Option<String>,

    /// Deterministic per order, see [`payment_idempotency_key`]
    pub idempotency_key: String,

    /// Provider-side references recorded at confirmation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub payment_details: HashMap<String, String>,
}

/// Idempotency key for an order's provider-side payment intent.
///
/// Pure function of the order id, so every retry of `initiate` presents the
/// same key to the provider.
pub fn payment_idempotency_key(order_id: &str) -> String {
    let digest = Sha256::digest(format!("checkout-payment:{}", order_id).as_bytes());
    format!("pay_{}", &hex::encode(digest)[..32])
}

/// Shipping address captured at checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient: String,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub phone: String,
}

impl ShippingAddress {
    /// Reject blank required fields
    pub fn validate(&self) -> CheckoutResult<()> {
        let fields = [
            ("recipient", &self.recipient),
            ("street", &self.street),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(CheckoutError::InvalidRequest(format!(
                    "shipping address field '{}' is required",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    /// No event is accepted from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events driving the order state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    PaymentConfirmed,
    Cancel,
    BeginFulfillment,
    Ship,
    Deliver,
    Refund,
}

impl OrderEvent {
    pub const ALL: [OrderEvent; 6] = [
        OrderEvent::PaymentConfirmed,
        OrderEvent::Cancel,
        OrderEvent::BeginFulfillment,
        OrderEvent::Ship,
        OrderEvent::Deliver,
        OrderEvent::Refund,
    ];

    /// Events only an operator may apply
    pub fn is_fulfillment(&self) -> bool {
        matches!(
            self,
            OrderEvent::BeginFulfillment
                | OrderEvent::Ship
                | OrderEvent::Deliver
                | OrderEvent::Refund
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::PaymentConfirmed => "payment_confirmed",
            OrderEvent::Cancel => "cancel",
            OrderEvent::BeginFulfillment => "begin_fulfillment",
            OrderEvent::Ship => "ship",
            OrderEvent::Deliver => "deliver",
            OrderEvent::Refund => "refund",
        }
    }
}

impl std::fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order: a frozen snapshot of a cart plus its payment and lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID (generated)
    pub id: String,

    /// Human-facing order number, unique
    pub order_number: String,

    pub owner_id: String,

    /// Deep copy of the cart lines at creation
    pub lines: Vec<CartLine>,

    pub shipping_address: ShippingAddress,

    pub payment: Payment,

    pub currency: Currency,
    pub subtotal: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,

    pub status: OrderStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Frozen totals
    pub fn totals(&self) -> Totals {
        Totals {
            subtotal: self.subtotal,
            shipping: self.shipping,
            tax: self.tax,
            total: self.total,
        }
    }

    /// Resolve the status `event` leads to, checking its precondition
    pub fn next_status(&self, event: OrderEvent) -> CheckoutResult<OrderStatus> {
        use OrderEvent as E;
        use OrderStatus as S;

        let next = match (self.status, event) {
            (S::Pending, E::PaymentConfirmed)
                if self.payment.provider_transaction_id.is_some()
                    && self.payment.amount == self.total =>
            {
                Some(S::Paid)
            }
            (S::Pending, E::Cancel) | (S::Paid, E::Cancel) => Some(S::Cancelled),
            (S::Paid, E::BeginFulfillment) => Some(S::Processing),
            (S::Processing, E::Ship) => Some(S::Shipped),
            (S::Shipped, E::Deliver) => Some(S::Delivered),
            (S::Paid, E::Refund) | (S::Processing, E::Refund)
                if self.payment.status == PaymentStatus::Completed =>
            {
                Some(S::Refunded)
            }
            _ => None,
        };

        next.ok_or(CheckoutError::InvalidTransition {
            from: self.status,
            event,
        })
    }

    /// Copy of this order with `event` applied. `self` is left untouched.
    pub fn applied(&self, event: OrderEvent, now: DateTime<Utc>) -> CheckoutResult<Order> {
        let status = self.next_status(event)?;
        let mut next = self.clone();
        next.status = status;
        if status == OrderStatus::Refunded {
            next.payment.status = PaymentStatus::Refunded;
        }
        next.updated_at = now;
        Ok(next)
    }
}

/// Generate a human-facing order number: `ORD-YYYYMMDD-XXXXXXXX`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}
