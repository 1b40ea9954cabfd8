//! # PayPal Orders v2
//!
//! `ProviderAdapter` over the Orders v2 API:
//!
//! 1. `create_intent` creates a PayPal order (intent CAPTURE). The buyer
//!    approves it in the PayPal popup or at the approval URL.
//! 2. `verify_confirmation` captures the approved order and reports what was
//!    captured. Capturing an already captured order reads it back instead.
//!
//! Access tokens come from the client-credentials grant and are cached until
//! shortly before they expire.

use crate::config::PaypalConfig;
use async_trait::async_trait;
use checkout_core::money::{format_minor, parse_minor};
use checkout_core::{
    CheckoutError, CheckoutResult, Currency, IntentRequest, PaymentMethod, ProviderAdapter,
    ProviderHandle, VerifiedPayment,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

const PROVIDER: &str = "paypal";

/// Refresh this long before PayPal says the token expires
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// PayPal adapter
pub struct PaypalAdapter {
    config: PaypalConfig,
    client: Client,
    token: RwLock<Option<CachedToken>>,
}

impl PaypalAdapter {
    pub fn new(config: PaypalConfig) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        Self::new(PaypalConfig::from_env()?)
    }

    // =========================================================================
    // OAuth
    // =========================================================================

    async fn access_token(&self) -> CheckoutResult<String> {
        let now = Utc::now();
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > now {
                return Ok(token.access_token.clone());
            }
        }

        let mut cached = self.token.write().await;
        // Another task may have refreshed while we waited for the write lock
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now {
                return Ok(token.access_token.clone());
            }
        }

        let url = format!("{}/v1/oauth2/token", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(transport_error)?;

        let body = read_body(response).await?;
        let token: OAuthTokenResponse = serde_json::from_str(&body).map_err(parse_error)?;

        debug!("Obtained PayPal access token, expires in {}s", token.expires_in);
        let refreshed = CachedToken {
            access_token: token.access_token,
            expires_at: now + ChronoDuration::seconds(token.expires_in - TOKEN_REFRESH_MARGIN_SECS),
        };
        let access_token = refreshed.access_token.clone();
        *cached = Some(refreshed);
        Ok(access_token)
    }

    // =========================================================================
    // Orders
    // =========================================================================

    async fn capture(&self, paypal_order_id: &str) -> CheckoutResult<PaypalOrder> {
        let access_token = self.access_token().await?;
        let url = format!(
            "{}/v2/checkout/orders/{}/capture",
            self.config.api_base_url, paypal_order_id
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .header("PayPal-Request-Id", format!("capture-{}", paypal_order_id))
            .json(&json!({}))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status == StatusCode::UNPROCESSABLE_ENTITY && has_issue(&body, "ORDER_ALREADY_CAPTURED") {
            debug!("PayPal order {} already captured, reading it back", paypal_order_id);
            return self.fetch(paypal_order_id).await;
        }
        if !status.is_success() {
            error!("PayPal API error: status={}, body={}", status, body);
            return Err(classify_failure(status, &body));
        }

        serde_json::from_str(&body).map_err(parse_error)
    }

    async fn fetch(&self, paypal_order_id: &str) -> CheckoutResult<PaypalOrder> {
        let access_token = self.access_token().await?;
        let url = format!(
            "{}/v2/checkout/orders/{}",
            self.config.api_base_url, paypal_order_id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(transport_error)?;

        let body = read_body(response).await?;
        serde_json::from_str(&body).map_err(parse_error)
    }
}

async fn read_body(response: reqwest::Response) -> CheckoutResult<String> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        error!("PayPal API error: status={}, body={}", status, body);
        return Err(classify_failure(status, &body));
    }
    Ok(body)
}

fn transport_error(e: reqwest::Error) -> CheckoutError {
    CheckoutError::ProviderUnavailable {
        provider: PROVIDER.to_string(),
        message: e.to_string(),
    }
}

fn parse_error(e: serde_json::Error) -> CheckoutError {
    CheckoutError::Serialization(format!("Failed to parse PayPal response: {}", e))
}

fn has_issue(body: &str, issue: &str) -> bool {
    serde_json::from_str::<PaypalErrorResponse>(body)
        .map(|e| e.details.iter().any(|d| d.issue == issue))
        .unwrap_or(false)
}

fn classify_failure(status: StatusCode, body: &str) -> CheckoutError {
    let message = serde_json::from_str::<PaypalErrorResponse>(body)
        .map(|e| match e.details.first() {
            Some(detail) => format!("{}: {}", e.name, detail.issue),
            None => e.message,
        })
        .unwrap_or_else(|_| format!("HTTP {}", status));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CheckoutError::ProviderUnavailable {
            provider: PROVIDER.to_string(),
            message,
        }
    } else {
        CheckoutError::ProviderRejected {
            provider: PROVIDER.to_string(),
            message,
        }
    }
}

/// Turn a captured PayPal order into the verified payment
fn verified_from_order(order: PaypalOrder) -> CheckoutResult<VerifiedPayment> {
    let (unit_ref, capture) = order
        .purchase_units
        .into_iter()
        .find_map(|unit| {
            let unit_ref = unit.custom_id.or(unit.reference_id);
            unit.payments
                .and_then(|p| p.captures.into_iter().next())
                .map(|capture| (unit_ref, capture))
        })
        .ok_or_else(|| CheckoutError::ProviderRejected {
            provider: PROVIDER.to_string(),
            message: format!("order {} has no capture (status {})", order.id, order.status),
        })?;

    match capture.status.as_str() {
        "COMPLETED" => {}
        "PENDING" => {
            return Err(CheckoutError::ProviderUnavailable {
                provider: PROVIDER.to_string(),
                message: "capture pending".to_string(),
            })
        }
        other => {
            return Err(CheckoutError::ProviderRejected {
                provider: PROVIDER.to_string(),
                message: format!("capture {}", other.to_lowercase()),
            })
        }
    }

    let currency = Currency::parse(&capture.amount.currency_code).ok_or_else(|| {
        CheckoutError::Serialization(format!(
            "unknown currency {}",
            capture.amount.currency_code
        ))
    })?;

    Ok(VerifiedPayment {
        transaction_id: capture.id,
        amount_confirmed: parse_minor(&capture.amount.value, currency)?,
        currency: Some(currency),
        intent_id: Some(order.id),
        order_ref: capture.custom_id.or(unit_ref),
    })
}

#[async_trait]
impl ProviderAdapter for PaypalAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paypal
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_intent(&self, request: &IntentRequest) -> CheckoutResult<ProviderHandle> {
        let access_token = self.access_token().await?;
        let url = format!("{}/v2/checkout/orders", self.config.api_base_url);

        let body = CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnitRequest {
                reference_id: request.order_id.clone(),
                custom_id: request.order_id.clone(),
                invoice_id: request.order_number.clone(),
                amount: Amount {
                    currency_code: request.currency.code(),
                    value: format_minor(request.amount, request.currency),
                },
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .header("PayPal-Request-Id", &request.idempotency_key)
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let body = read_body(response).await?;
        let order: PaypalOrder = serde_json::from_str(&body).map_err(parse_error)?;

        let approval_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone());
        if approval_url.is_none() {
            warn!("PayPal order {} has no approval link", order.id);
        }

        info!("Created PayPal order: id={}", order.id);

        Ok(ProviderHandle {
            method: PaymentMethod::Paypal,
            client_token: order.id.clone(),
            intent_id: order.id,
            approval_url,
            created_at: Utc::now(),
        })
    }

    /// The token is the PayPal order id the buyer approved
    #[instrument(skip(self))]
    async fn verify_confirmation(&self, token: &str) -> CheckoutResult<VerifiedPayment> {
        let well_formed =
            !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !well_formed {
            return Err(CheckoutError::ProviderRejected {
                provider: PROVIDER.to_string(),
                message: "not a PayPal order id".to_string(),
            });
        }

        let order = self.capture(token).await?;
        verified_from_order(order)
    }
}

// =============================================================================
// PayPal API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnitRequest>,
}

#[derive(Debug, Serialize)]
struct PurchaseUnitRequest {
    reference_id: String,
    custom_id: String,
    invoice_id: String,
    amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
struct Amount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PaypalOrder {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    reference_id: Option<String>,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
    amount: Amount,
    #[serde(default)]
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaypalErrorResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    issue: String,
}
