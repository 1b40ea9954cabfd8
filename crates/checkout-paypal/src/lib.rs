//! # checkout-paypal
//!
//! PayPal payment adapter for checkout-rs, over the Orders v2 REST API.
//!
//! ```rust,ignore
//! use checkout_paypal::PaypalAdapter;
//!
//! let paypal = PaypalAdapter::from_env()?;
//! let providers = ProviderRegistry::new().with_adapter(Arc::new(paypal));
//! ```
//!
//! The buyer approves the PayPal order client-side; the approved PayPal
//! order id is the confirmation token passed to `PaymentCoordinator::confirm`.

pub mod config;
pub mod orders;

pub use config::{PaypalConfig, PaypalMode};
pub use orders::PaypalAdapter;
