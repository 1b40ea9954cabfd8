//! # checkout-api
//!
//! HTTP API layer for checkout-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Buyer endpoints for carts, orders and payments
//! - Operator endpoint for fulfillment
//! - Webhook handler for Stripe payment events
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/cart` | Current cart with subtotal |
//! | DELETE | `/api/v1/cart` | Clear cart |
//! | POST | `/api/v1/cart/items` | Add line |
//! | PATCH | `/api/v1/cart/items/{line_id}` | Set line quantity |
//! | DELETE | `/api/v1/cart/items/{line_id}` | Remove line |
//! | PUT | `/api/v1/cart/sync` | Reconcile a cached cart |
//! | POST | `/api/v1/orders` | Create order from cart |
//! | GET | `/api/v1/orders` | List own orders |
//! | GET | `/api/v1/orders/{order_id}` | Get order |
//! | POST | `/api/v1/orders/{order_id}/cancel` | Cancel pending order |
//! | POST | `/api/v1/orders/{order_id}/payment` | Initiate payment |
//! | POST | `/api/v1/orders/{order_id}/payment/confirm` | Confirm payment |
//! | POST | `/api/v1/admin/orders/{order_id}/fulfillment` | Operator transition |
//! | POST | `/webhook/stripe` | Stripe webhook |

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
