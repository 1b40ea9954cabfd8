//! # Checkout Error Types
//!
//! Typed error handling for carts, orders and payments.
//! All checkout operations return `Result<T, CheckoutError>`.

use crate::order::{OrderEvent, OrderStatus, PaymentMethod};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for all checkout operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    /// Quantity was zero where a positive value is required, or negative
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i64 },

    /// Caller's view of the cart is out of date
    #[error("Stale cart revision: expected {expected}, current {current}")]
    StaleRevision { expected: u64, current: u64 },

    /// Order creation attempted from a cart with no lines
    #[error("Cart is empty")]
    EmptyCart,

    /// Event not permitted from the order's current status
    #[error("Invalid transition: {event} not allowed from {from}")]
    InvalidTransition { from: OrderStatus, event: OrderEvent },

    /// Provider confirmed a different amount than the order total
    #[error("Amount mismatch: expected {expected}, provider confirmed {confirmed}")]
    AmountMismatch { expected: i64, confirmed: i64 },

    /// Provider transaction already recorded against another order
    #[error("Duplicate confirmation: transaction {transaction_id} already recorded")]
    DuplicateConfirmation { transaction_id: String },

    /// Provider payment was opened for a different order
    #[error("Confirmation for order {confirmed_for} presented on order {order_id}")]
    ForeignConfirmation {
        order_id: String,
        confirmed_for: String,
    },

    /// Order is already paid under a different transaction
    #[error("Order already paid: {order_id}")]
    OrderAlreadyPaid { order_id: String },

    /// Provider could not be reached or timed out; safe to retry
    #[error("Provider unavailable [{provider}]: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// Provider refused the payment; terminal for this attempt
    #[error("Provider rejected [{provider}]: {message}")]
    ProviderRejected { provider: String, message: String },

    /// Cart line does not exist
    #[error("Cart line not found: {line_id}")]
    LineNotFound { line_id: String },

    /// Order does not exist (or is not visible to the caller)
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// Payment initiated with a method other than the one the order was created with
    #[error("Payment method mismatch: order uses {expected}, requested {requested}")]
    PaymentMethodMismatch {
        expected: PaymentMethod,
        requested: PaymentMethod,
    },

    /// No adapter registered for this method
    #[error("Unsupported payment method: {method}")]
    UnsupportedPaymentMethod { method: String },

    /// Monetary value out of range or malformed
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// What the buyer-facing flow is allowed to see about a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerPaymentState {
    /// Payment still outstanding (or a transient problem; try again shortly)
    Pending,
    /// Payment captured
    Succeeded,
    /// Payment failed, buyer should retry
    Failed,
}

impl BuyerPaymentState {
    /// Message shown to the buyer
    pub fn message(&self) -> &'static str {
        match self {
            BuyerPaymentState::Pending => "Payment pending",
            BuyerPaymentState::Succeeded => "Payment succeeded",
            BuyerPaymentState::Failed => "Payment failed, please retry",
        }
    }
}

impl CheckoutError {
    /// Returns true if re-invoking the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::ProviderUnavailable { .. } | CheckoutError::StaleRevision { .. }
        )
    }

    /// Errors that indicate a bug or an attack and are logged at error level
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            CheckoutError::AmountMismatch { .. }
                | CheckoutError::DuplicateConfirmation { .. }
                | CheckoutError::ForeignConfirmation { .. }
        )
    }

    /// Collapse a payment error into the three buyer-visible states
    pub fn buyer_state(&self) -> BuyerPaymentState {
        match self {
            CheckoutError::ProviderUnavailable { .. } => BuyerPaymentState::Pending,
            CheckoutError::OrderAlreadyPaid { .. } => BuyerPaymentState::Succeeded,
            _ => BuyerPaymentState::Failed,
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CheckoutError::InvalidQuantity { .. } => 400,
            CheckoutError::StaleRevision { .. } => 409,
            CheckoutError::EmptyCart => 400,
            CheckoutError::InvalidTransition { .. } => 409,
            CheckoutError::AmountMismatch { .. } => 402,
            CheckoutError::DuplicateConfirmation { .. } => 409,
            CheckoutError::ForeignConfirmation { .. } => 409,
            CheckoutError::OrderAlreadyPaid { .. } => 409,
            CheckoutError::ProviderUnavailable { .. } => 503,
            CheckoutError::ProviderRejected { .. } => 402,
            CheckoutError::LineNotFound { .. } => 404,
            CheckoutError::OrderNotFound { .. } => 404,
            CheckoutError::PaymentMethodMismatch { .. } => 400,
            CheckoutError::UnsupportedPaymentMethod { .. } => 400,
            CheckoutError::InvalidAmount { .. } => 400,
            CheckoutError::InvalidRequest(_) => 400,
            CheckoutError::Configuration(_) => 500,
            CheckoutError::Serialization(_) => 500,
            CheckoutError::Internal(_) => 500,
        }
    }
}

/// Result type alias for checkout operations
pub type CheckoutResult<T> = Result<T, CheckoutError>;
