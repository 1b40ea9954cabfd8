//! # checkout-stripe
//!
//! Stripe payment adapter for checkout-rs.
//!
//! - **StripeAdapter** - PaymentIntents API behind `ProviderAdapter`.
//!   The browser confirms the intent with the client secret; the server
//!   reads the intent back to verify what was actually captured.
//! - **StripeWebhookVerifier** - `Stripe-Signature` verification and parsing
//!   of `payment_intent.*` events.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkout_stripe::StripeAdapter;
//! use checkout_core::ProviderRegistry;
//!
//! let stripe = StripeAdapter::from_env()?;
//! let providers = ProviderRegistry::new().with_adapter(Arc::new(stripe));
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! let event = verifier.verify(payload, signature)?;
//! if let (StripeEventKind::Succeeded, Some(order_id), Some(intent_id)) =
//!     (&event.kind, &event.order_id, &event.intent_id)
//! {
//!     coordinator.confirm(order_id, intent_id).await?;
//! }
//! ```

pub mod config;
pub mod intents;
pub mod webhook;

pub use config::StripeConfig;
pub use intents::StripeAdapter;
pub use webhook::{StripeEventKind, StripePaymentEvent, StripeWebhookVerifier};
