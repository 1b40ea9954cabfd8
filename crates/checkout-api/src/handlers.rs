//! # Request Handlers
//!
//! Axum request handlers for the checkout API.
//! Payment endpoints answer with a buyer-facing payment state only; every
//! other endpoint reports the error kind.

use crate::auth::{Operator, OwnerId};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use checkout_core::{
    BuyerPaymentState, Cart, CheckoutError, Currency, NewLine, Order, OrderEvent, OrderPage,
    OrderQuery, PaymentMethod, PriceEngine, ProviderHandle, Reconciliation, ShippingAddress,
};
use checkout_stripe::StripeEventKind;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<T, ApiError>;

fn checkout_error_to_response(err: CheckoutError) -> ApiError {
    let code = err.status_code();
    let response = ErrorResponse::new(err.to_string(), code);
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

/// Cart with its derived totals
#[derive(Debug, Serialize, Deserialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub subtotal: i64,
    pub item_count: u64,
    pub currency: Currency,
}

fn cart_view(state: &AppState, cart: Cart) -> ApiResult<Json<CartView>> {
    let subtotal = PriceEngine::subtotal(&cart.lines).map_err(checkout_error_to_response)?;
    Ok(Json(CartView {
        subtotal,
        item_count: cart.item_count(),
        currency: state.ledger.pricing().currency,
        cart,
    }))
}

/// Optional optimistic-concurrency guard
#[derive(Debug, Default, Deserialize)]
pub struct RevisionQuery {
    #[serde(default)]
    pub expected_revision: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    #[serde(flatten)]
    pub line: NewLine,
    #[serde(default)]
    pub expected_revision: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
    #[serde(default)]
    pub expected_revision: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    /// `adopted_client` or `kept_server`
    pub outcome: String,
    pub cart: CartView,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
    /// Cart revision the buyer reviewed
    #[serde(default)]
    pub expected_revision: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    /// Stripe payment intent id or approved PayPal order id
    #[serde(alias = "payment_intent_id", alias = "paypal_order_id")]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct FulfillmentRequest {
    pub event: OrderEvent,
}

/// What the buyer's client sees of a payment
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub state: BuyerPaymentState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ProviderHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishable_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

impl PaymentResponse {
    fn new(state: BuyerPaymentState) -> Self {
        Self {
            state,
            message: state.message().to_string(),
            handle: None,
            publishable_key: None,
            order: None,
        }
    }
}

/// Collapse a payment error into a buyer state
fn payment_failure(err: CheckoutError) -> Response {
    let state = err.buyer_state();
    let status = match state {
        BuyerPaymentState::Pending => StatusCode::SERVICE_UNAVAILABLE,
        BuyerPaymentState::Succeeded => StatusCode::OK,
        BuyerPaymentState::Failed => StatusCode::PAYMENT_REQUIRED,
    };
    (status, Json(PaymentResponse::new(state))).into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<_> = state
        .coordinator
        .providers()
        .methods()
        .iter()
        .map(|m| m.as_str())
        .collect();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "checkout-rs",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": providers
    }))
}

// --- Cart --------------------------------------------------------------------

#[instrument(skip(state), fields(owner_id = %owner.0))]
pub async fn get_cart(State(state): State<AppState>, owner: OwnerId) -> ApiResult<Json<CartView>> {
    let cart = state.carts.get(&owner.0);
    cart_view(&state, cart)
}

#[instrument(skip(state), fields(owner_id = %owner.0))]
pub async fn clear_cart(
    State(state): State<AppState>,
    owner: OwnerId,
) -> ApiResult<Json<CartView>> {
    let cart = state
        .carts
        .clear(&owner.0)
        .map_err(checkout_error_to_response)?;
    cart_view(&state, cart)
}

#[instrument(skip(state, request), fields(owner_id = %owner.0, product_id = %request.line.product_id))]
pub async fn add_line(
    State(state): State<AppState>,
    owner: OwnerId,
    Json(request): Json<AddLineRequest>,
) -> ApiResult<Json<CartView>> {
    let cart = state
        .carts
        .add_line(&owner.0, request.line, request.expected_revision)
        .map_err(checkout_error_to_response)?;
    cart_view(&state, cart)
}

#[instrument(skip(state, request), fields(owner_id = %owner.0))]
pub async fn set_quantity(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(line_id): Path<String>,
    Json(request): Json<SetQuantityRequest>,
) -> ApiResult<Json<CartView>> {
    let cart = state
        .carts
        .set_quantity(&owner.0, &line_id, request.quantity, request.expected_revision)
        .map_err(checkout_error_to_response)?;
    cart_view(&state, cart)
}

#[instrument(skip(state), fields(owner_id = %owner.0))]
pub async fn remove_line(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(line_id): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<Json<CartView>> {
    let cart = state
        .carts
        .remove_line(&owner.0, &line_id, query.expected_revision)
        .map_err(checkout_error_to_response)?;
    cart_view(&state, cart)
}

/// Reconcile the client's cached cart against the server copy
#[instrument(skip(state, incoming), fields(owner_id = %owner.0, revision = incoming.revision))]
pub async fn sync_cart(
    State(state): State<AppState>,
    owner: OwnerId,
    Json(incoming): Json<Cart>,
) -> ApiResult<Json<SyncResponse>> {
    let outcome = state
        .carts
        .reconcile(&owner.0, incoming)
        .map_err(checkout_error_to_response)?;

    let (label, cart) = match outcome {
        Reconciliation::AdoptedIncoming(cart) => ("adopted_client", cart),
        Reconciliation::KeptStored(cart) => ("kept_server", cart),
    };
    let Json(view) = cart_view(&state, cart)?;
    Ok(Json(SyncResponse {
        outcome: label.to_string(),
        cart: view,
    }))
}

// --- Orders ------------------------------------------------------------------

#[instrument(skip(state, request), fields(owner_id = %owner.0, method = %request.payment_method))]
pub async fn create_order(
    State(state): State<AppState>,
    owner: OwnerId,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    if !state.coordinator.providers().has_method(request.payment_method) {
        return Err(checkout_error_to_response(
            CheckoutError::UnsupportedPaymentMethod {
                method: request.payment_method.to_string(),
            },
        ));
    }

    let order = state
        .ledger
        .checkout(
            &owner.0,
            request.expected_revision,
            request.shipping_address,
            request.payment_method,
            request.notes,
        )
        .map_err(checkout_error_to_response)?;

    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    owner: OwnerId,
    Query(query): Query<OrderQuery>,
) -> Json<OrderPage> {
    Json(state.ledger.list_for_owner(&owner.0, &query))
}

pub async fn get_order(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    state
        .ledger
        .get_for_owner(&order_id, &owner.0)
        .map(Json)
        .map_err(checkout_error_to_response)
}

#[instrument(skip(state), fields(owner_id = %owner.0))]
pub async fn cancel_order(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    state
        .ledger
        .get_for_owner(&order_id, &owner.0)
        .map_err(checkout_error_to_response)?;

    state
        .ledger
        .transition(&order_id, OrderEvent::Cancel)
        .map(Json)
        .map_err(checkout_error_to_response)
}

// --- Payments ----------------------------------------------------------------

#[instrument(skip(state, request), fields(owner_id = %owner.0, method = %request.payment_method))]
pub async fn initiate_payment(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(order_id): Path<String>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Response {
    if let Err(e) = state.ledger.get_for_owner(&order_id, &owner.0) {
        return checkout_error_to_response(e).into_response();
    }

    match state
        .coordinator
        .initiate(&order_id, request.payment_method)
        .await
    {
        Ok(handle) => {
            let mut response = PaymentResponse::new(BuyerPaymentState::Pending);
            if handle.method == PaymentMethod::Stripe {
                response.publishable_key = state.stripe_publishable_key.clone();
            }
            response.handle = Some(handle);
            Json(response).into_response()
        }
        Err(e) => payment_failure(e),
    }
}

#[instrument(skip(state, request), fields(owner_id = %owner.0))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    owner: OwnerId,
    Path(order_id): Path<String>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Response {
    if let Err(e) = state.ledger.get_for_owner(&order_id, &owner.0) {
        return checkout_error_to_response(e).into_response();
    }

    match state.coordinator.confirm(&order_id, &request.token).await {
        Ok(order) => {
            let mut response = PaymentResponse::new(BuyerPaymentState::Succeeded);
            response.order = Some(order);
            Json(response).into_response()
        }
        Err(e) => payment_failure(e),
    }
}

// --- Operator ----------------------------------------------------------------

/// Apply a fulfillment event (or an operator cancel)
#[instrument(skip(state, _operator))]
pub async fn advance_fulfillment(
    State(state): State<AppState>,
    _operator: Operator,
    Path(order_id): Path<String>,
    Json(request): Json<FulfillmentRequest>,
) -> ApiResult<Json<Order>> {
    if !request.event.is_fulfillment() && request.event != OrderEvent::Cancel {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                format!("{} cannot be applied by an operator", request.event),
                400,
            )),
        ));
    }

    state
        .ledger
        .transition(&order_id, request.event)
        .map(Json)
        .map_err(checkout_error_to_response)
}

// --- Webhooks ----------------------------------------------------------------

/// Handle Stripe webhook.
///
/// Retryable failures answer 503 so Stripe redelivers; anything else is
/// acknowledged once logged.
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Missing Stripe-Signature header", 400)),
            )
        })?;

    let verifier = state.stripe_webhook.as_ref().ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Stripe not configured", 500)),
        )
    })?;

    let event = verifier.verify(&body, signature).map_err(|e| {
        error!("Webhook verification failed: {}", e);
        checkout_error_to_response(e)
    })?;

    info!("Received webhook: kind={:?}, id={}", event.kind, event.event_id);

    let (Some(order_id), Some(intent_id)) = (event.order_id.as_deref(), event.intent_id.as_deref())
    else {
        if !matches!(event.kind, StripeEventKind::Ignored(_)) {
            warn!("Webhook {} carries no order reference", event.event_id);
        }
        return Ok(StatusCode::OK);
    };

    let result = match &event.kind {
        StripeEventKind::Succeeded => state.coordinator.confirm(order_id, intent_id).await.map(|_| ()),
        StripeEventKind::Failed { reason } => state
            .coordinator
            .record_failure(order_id, reason)
            .map(|_| ()),
        StripeEventKind::Ignored(_) => Ok(()),
    };

    match result {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) if e.is_retryable() => {
            warn!("Webhook {} not processed yet: {}", event.event_id, e);
            Err(checkout_error_to_response(e))
        }
        Err(e) => {
            warn!("Webhook {} acknowledged without effect: {}", event.event_id, e);
            Ok(StatusCode::OK)
        }
    }
}
