//! # Routes
//!
//! Axum router configuration for the checkout API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Cart (buyer, `x-owner-id`):
///   - GET/DELETE /api/v1/cart
///   - POST /api/v1/cart/items
///   - PATCH/DELETE /api/v1/cart/items/{line_id}
///   - PUT /api/v1/cart/sync
///
/// - Orders & payments (buyer, `x-owner-id`):
///   - POST/GET /api/v1/orders
///   - GET /api/v1/orders/{order_id}
///   - POST /api/v1/orders/{order_id}/cancel
///   - POST /api/v1/orders/{order_id}/payment
///   - POST /api/v1/orders/{order_id}/payment/confirm
///
/// - Operator (`x-operator-key`):
///   - POST /api/v1/admin/orders/{order_id}/fulfillment
///
/// - Webhooks:
///   - POST /webhook/stripe
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let cart_routes = Router::new()
        .route("/", get(handlers::get_cart).delete(handlers::clear_cart))
        .route("/items", post(handlers::add_line))
        .route(
            "/items/{line_id}",
            patch(handlers::set_quantity).delete(handlers::remove_line),
        )
        .route("/sync", put(handlers::sync_cart));

    let order_routes = Router::new()
        .route("/", post(handlers::create_order).get(handlers::list_orders))
        .route("/{order_id}", get(handlers::get_order))
        .route("/{order_id}/cancel", post(handlers::cancel_order))
        .route("/{order_id}/payment", post(handlers::initiate_payment))
        .route("/{order_id}/payment/confirm", post(handlers::confirm_payment));

    let admin_routes = Router::new().route(
        "/orders/{order_id}/fulfillment",
        post(handlers::advance_fulfillment),
    );

    let api_routes = Router::new()
        .nest("/cart", cart_routes)
        .nest("/orders", order_routes)
        .nest("/admin", admin_routes);

    // Webhook routes (must accept raw body)
    let webhook_routes = Router::new().route("/stripe", post(handlers::stripe_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/webhook", webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{OPERATOR_KEY_HEADER, OWNER_HEADER};
    use crate::handlers::{CartView, PaymentResponse};
    use crate::state::AppConfig;
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::{TestResponse, TestServer};
    use checkout_core::testing::MockProvider;
    use checkout_core::{
        BuyerPaymentState, Order, OrderStatus, PaymentMethod, PricingConfig, ProviderRegistry,
    };
    use checkout_stripe::webhook::sign_payload;
    use checkout_stripe::StripeWebhookVerifier;
    use serde_json::{json, Value};
    use std::sync::Arc;

    const WEBHOOK_SECRET: &str = "whsec_test";
    const OPERATOR_KEY: &str = "op-secret";

    struct TestApp {
        server: TestServer,
        stripe: Arc<MockProvider>,
        state: AppState,
    }

    fn app() -> TestApp {
        let pricing = PricingConfig::from_toml(
            r#"
            currency = "usd"
            [shipping]
            flat_rate = 500
            [tax]
            rate_bps = 450
            "#,
        )
        .unwrap()
        .rules();

        let stripe = Arc::new(MockProvider::new(PaymentMethod::Stripe));
        let providers = ProviderRegistry::new().with_adapter(stripe.clone());
        let config = AppConfig {
            operator_api_key: Some(OPERATOR_KEY.to_string()),
            ..AppConfig::default()
        };
        let state = AppState::from_parts(
            config,
            pricing,
            providers,
            Some(StripeWebhookVerifier::new(WEBHOOK_SECRET)),
        );
        let server = TestServer::new(create_router(state.clone())).unwrap();
        TestApp {
            server,
            stripe,
            state,
        }
    }

    fn owner(id: &'static str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static(OWNER_HEADER),
            HeaderValue::from_static(id),
        )
    }

    fn mug() -> Value {
        json!({
            "product_id": "mug",
            "variant_id": "blue",
            "display_name": "Mug",
            "variant_name": "Blue",
            "unit_price": 2500,
            "quantity": 2
        })
    }

    fn address() -> Value {
        json!({
            "recipient": "Ada Lovelace",
            "street": "1 Analytical Way",
            "city": "London",
            "postal_code": "N1",
            "country": "GB"
        })
    }

    impl TestApp {
        async fn post(&self, path: &str, who: &'static str, body: Value) -> TestResponse {
            let (name, value) = owner(who);
            self.server.post(path).add_header(name, value).json(&body).await
        }

        async fn get(&self, path: &str, who: &'static str) -> TestResponse {
            let (name, value) = owner(who);
            self.server.get(path).add_header(name, value).await
        }

        /// Cart with two mugs turned into a pending stripe order
        async fn pending_order(&self, who: &'static str) -> Order {
            self.post("/api/v1/cart/items", who, mug()).await.assert_status_ok();
            let response = self
                .post(
                    "/api/v1/orders",
                    who,
                    json!({ "shipping_address": address(), "payment_method": "stripe" }),
                )
                .await;
            response.assert_status(StatusCode::CREATED);
            response.json::<Order>()
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let response = app.server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["providers"], json!(["stripe"]));
    }

    #[tokio::test]
    async fn test_cart_requires_owner() {
        let app = app();
        app.server
            .get("/api/v1/cart")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cart_lines_and_summary() {
        let app = app();
        let response = app.post("/api/v1/cart/items", "u1", mug()).await;
        response.assert_status_ok();
        let cart = response.json::<CartView>();
        assert_eq!(cart.subtotal, 5000);
        assert_eq!(cart.item_count, 2);
        let line_id = cart.cart.lines[0].line_id.clone();

        let (name, value) = owner("u1");
        let stale = app
            .server
            .patch(&format!("/api/v1/cart/items/{}", line_id))
            .add_header(name, value)
            .json(&json!({ "quantity": 5, "expected_revision": 0 }))
            .await;
        stale.assert_status(StatusCode::CONFLICT);

        let (name, value) = owner("u1");
        let updated = app
            .server
            .patch(&format!("/api/v1/cart/items/{}", line_id))
            .add_header(name, value)
            .json(&json!({ "quantity": 5, "expected_revision": cart.cart.revision }))
            .await;
        updated.assert_status_ok();
        assert_eq!(updated.json::<CartView>().subtotal, 12500);

        // Other owners see their own, empty cart
        let other = app.get("/api/v1/cart", "u2").await.json::<CartView>();
        assert!(other.cart.lines.is_empty());
    }

    #[tokio::test]
    async fn test_cart_sync_outcomes() {
        let app = app();
        let stored = app
            .post("/api/v1/cart/items", "u1", mug())
            .await
            .json::<CartView>()
            .cart;

        let (name, value) = owner("u1");
        let mut stale = stored.clone();
        stale.revision = 0;
        stale.lines[0].quantity = 9;
        let kept = app
            .server
            .put("/api/v1/cart/sync")
            .add_header(name, value)
            .json(&stale)
            .await;
        kept.assert_status_ok();
        let body = kept.json::<Value>();
        assert_eq!(body["outcome"], "kept_server");
        assert_eq!(body["cart"]["item_count"], 2);

        let (name, value) = owner("u1");
        let mut newer = stored.clone();
        newer.revision = stored.revision + 1;
        newer.lines[0].quantity = 3;
        let adopted = app
            .server
            .put("/api/v1/cart/sync")
            .add_header(name, value)
            .json(&newer)
            .await;
        adopted.assert_status_ok();
        let body = adopted.json::<Value>();
        assert_eq!(body["outcome"], "adopted_client");
        assert_eq!(body["cart"]["item_count"], 3);
        assert_eq!(body["cart"]["revision"], stored.revision + 1);
    }

    #[tokio::test]
    async fn test_negative_quantity_rejected() {
        let app = app();
        let mut line = mug();
        line["quantity"] = json!(-1);
        app.post("/api/v1/cart/items", "u1", line)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_order_from_empty_cart() {
        let app = app();
        app.post(
            "/api/v1/orders",
            "u1",
            json!({ "shipping_address": address(), "payment_method": "stripe" }),
        )
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_rejected() {
        let app = app();
        app.post("/api/v1/cart/items", "u1", mug()).await.assert_status_ok();
        app.post(
            "/api/v1/orders",
            "u1",
            json!({ "shipping_address": address(), "payment_method": "paypal" }),
        )
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkout_flow() {
        let app = app();
        let order = app.pending_order("u1").await;
        assert_eq!(order.total, 5725);
        assert_eq!(order.status, OrderStatus::Pending);

        let path = format!("/api/v1/orders/{}/payment", order.id);
        let initiated = app
            .post(&path, "u1", json!({ "payment_method": "stripe" }))
            .await;
        initiated.assert_status_ok();
        let handle = initiated.json::<PaymentResponse>().handle.unwrap();

        app.stripe.succeed(&handle.intent_id, &handle.intent_id, 5725);
        let confirmed = app
            .post(
                &format!("{}/confirm", path),
                "u1",
                json!({ "payment_intent_id": handle.intent_id }),
            )
            .await;
        confirmed.assert_status_ok();
        let body = confirmed.json::<PaymentResponse>();
        assert_eq!(body.state, BuyerPaymentState::Succeeded);
        assert_eq!(body.order.unwrap().status, OrderStatus::Paid);

        let cart = app.get("/api/v1/cart", "u1").await.json::<CartView>();
        assert!(cart.cart.lines.is_empty());

        let listed = app.get("/api/v1/orders?status=paid", "u1").await.json::<Value>();
        assert_eq!(listed["total"], json!(1));
    }

    #[tokio::test]
    async fn test_payment_failure_is_generic() {
        let app = app();
        let order = app.pending_order("u1").await;
        app.stripe.succeed("pi_short", "pi_short", 100);

        let response = app
            .post(
                &format!("/api/v1/orders/{}/payment/confirm", order.id),
                "u1",
                json!({ "token": "pi_short" }),
            )
            .await;
        response.assert_status(StatusCode::PAYMENT_REQUIRED);
        let body = response.json::<Value>();
        assert_eq!(body["state"], json!("failed"));
        assert!(!body.to_string().contains("mismatch"));
    }

    #[tokio::test]
    async fn test_orders_are_private() {
        let app = app();
        let order = app.pending_order("u1").await;
        app.get(&format!("/api/v1/orders/{}", order.id), "u2")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        app.post(&format!("/api/v1/orders/{}/cancel", order.id), "u2", json!({}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_keeps_cart() {
        let app = app();
        let order = app.pending_order("u1").await;
        let cancelled = app
            .post(&format!("/api/v1/orders/{}/cancel", order.id), "u1", json!({}))
            .await;
        cancelled.assert_status_ok();
        assert_eq!(cancelled.json::<Order>().status, OrderStatus::Cancelled);

        let cart = app.get("/api/v1/cart", "u1").await.json::<CartView>();
        assert_eq!(cart.item_count, 2);
    }

    #[tokio::test]
    async fn test_operator_fulfillment() {
        let app = app();
        let order = app.pending_order("u1").await;
        let path = format!("/api/v1/admin/orders/{}/fulfillment", order.id);

        app.server
            .post(&path)
            .json(&json!({ "event": "cancel" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let operator = (
            HeaderName::from_static(OPERATOR_KEY_HEADER),
            HeaderValue::from_static(OPERATOR_KEY),
        );
        app.server
            .post(&path)
            .add_header(operator.0.clone(), operator.1.clone())
            .json(&json!({ "event": "payment_confirmed" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        // Unpaid orders cannot enter fulfillment
        app.server
            .post(&path)
            .add_header(operator.0.clone(), operator.1.clone())
            .json(&json!({ "event": "begin_fulfillment" }))
            .await
            .assert_status(StatusCode::CONFLICT);

        app.stripe.succeed("pi_ok", "pi_ok", 5725);
        app.state.coordinator.confirm(&order.id, "pi_ok").await.unwrap();

        let processing = app
            .server
            .post(&path)
            .add_header(operator.0, operator.1)
            .json(&json!({ "event": "begin_fulfillment" }))
            .await;
        processing.assert_status_ok();
        assert_eq!(processing.json::<Order>().status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_stripe_webhook_confirms_order() {
        let app = app();
        let order = app.pending_order("u1").await;
        app.stripe.succeed("pi_hook", "pi_hook", 5725);

        let payload = serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_hook",
                "metadata": { "order_id": order.id }
            }}
        }))
        .unwrap();
        let signature =
            sign_payload(WEBHOOK_SECRET, &payload, chrono::Utc::now().timestamp()).unwrap();

        app.server
            .post("/webhook/stripe")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_str(&signature).unwrap(),
            )
            .bytes(payload.clone().into())
            .await
            .assert_status_ok();
        assert_eq!(
            app.state.ledger.get(&order.id).unwrap().status,
            OrderStatus::Paid
        );

        // Redelivery is harmless
        app.server
            .post("/webhook/stripe")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_str(&signature).unwrap(),
            )
            .bytes(payload.into())
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_stripe_webhook_rejects_bad_signature() {
        let app = app();
        app.server
            .post("/webhook/stripe")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_static("t=1,v1=deadbeef"),
            )
            .bytes(b"{}".to_vec().into())
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
