//! # Stripe Payment Intents
//!
//! `ProviderAdapter` over the PaymentIntents API. The browser confirms the
//! intent with the client secret; the server only creates and reads it.

use crate::config::StripeConfig;
use async_trait::async_trait;
use checkout_core::{
    CheckoutError, CheckoutResult, Currency, IntentRequest, PaymentMethod, ProviderAdapter,
    ProviderHandle, VerifiedPayment,
};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

const PROVIDER: &str = "stripe";

/// Stripe adapter
pub struct StripeAdapter {
    config: StripeConfig,
    client: Client,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn intent_params(request: &IntentRequest) -> Vec<(&'static str, String)> {
        vec![
            ("amount", request.amount.to_string()),
            ("currency", request.currency.as_str().to_string()),
            ("metadata[order_id]", request.order_id.clone()),
            ("metadata[order_number]", request.order_number.clone()),
            ("description", format!("Order {}", request.order_number)),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ]
    }

    /// Read a Stripe response body, mapping HTTP failures to checkout errors
    async fn read_body(response: reqwest::Response) -> CheckoutResult<String> {
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);
            return Err(classify_failure(status, &body));
        }
        Ok(body)
    }
}

fn transport_error(e: reqwest::Error) -> CheckoutError {
    CheckoutError::ProviderUnavailable {
        provider: PROVIDER.to_string(),
        message: e.to_string(),
    }
}

fn parse_error(e: serde_json::Error) -> CheckoutError {
    CheckoutError::Serialization(format!("Failed to parse Stripe response: {}", e))
}

/// 429 and 5xx are worth retrying; any other failure is Stripe refusing
fn classify_failure(status: StatusCode, body: &str) -> CheckoutError {
    let message = serde_json::from_str::<StripeErrorResponse>(body)
        .map(|r| r.error.message)
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

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_intent(&self, request: &IntentRequest) -> CheckoutResult<ProviderHandle> {
        let url = format!("{}/v1/payment_intents", self.config.api_base_url);
        debug!("Creating Stripe payment intent: amount={}", request.amount);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&Self::intent_params(request))
            .send()
            .await
            .map_err(transport_error)?;

        let body = Self::read_body(response).await?;
        let intent: StripePaymentIntent = serde_json::from_str(&body).map_err(parse_error)?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            CheckoutError::Serialization("Stripe intent has no client_secret".to_string())
        })?;

        info!("Created Stripe payment intent: id={}", intent.id);

        Ok(ProviderHandle {
            method: PaymentMethod::Stripe,
            intent_id: intent.id,
            client_token: client_secret,
            approval_url: None,
            created_at: Utc::now(),
        })
    }

    /// The token is the payment intent id
    #[instrument(skip(self))]
    async fn verify_confirmation(&self, token: &str) -> CheckoutResult<VerifiedPayment> {
        let well_formed = token.starts_with("pi_")
            && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !well_formed {
            return Err(CheckoutError::ProviderRejected {
                provider: PROVIDER.to_string(),
                message: "not a payment intent id".to_string(),
            });
        }

        let url = format!("{}/v1/payment_intents/{}", self.config.api_base_url, token);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .send()
            .await
            .map_err(transport_error)?;

        let body = Self::read_body(response).await?;
        let intent: StripePaymentIntent = serde_json::from_str(&body).map_err(parse_error)?;

        match intent.status.as_str() {
            "succeeded" => {
                let order_ref = intent.metadata.get("order_id").cloned();
                debug!(
                    "Stripe intent {} succeeded for order {:?}",
                    intent.id, order_ref
                );
                Ok(VerifiedPayment {
                    transaction_id: intent.id.clone(),
                    amount_confirmed: intent.amount_received,
                    currency: Currency::parse(&intent.currency),
                    intent_id: Some(intent.id),
                    order_ref,
                })
            }
            "processing" | "requires_action" | "requires_confirmation" | "requires_capture" => {
                Err(CheckoutError::ProviderUnavailable {
                    provider: PROVIDER.to_string(),
                    message: format!("payment intent is {}", intent.status),
                })
            }
            other => Err(CheckoutError::ProviderRejected {
                provider: PROVIDER.to_string(),
                message: intent
                    .last_payment_error
                    .map(|e| e.message)
                    .unwrap_or_else(|| format!("payment intent is {}", other)),
            }),
        }
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    currency: String,
    #[serde(default)]
    amount_received: i64,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    last_payment_error: Option<StripeError>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> StripeAdapter {
        let config = StripeConfig::new("sk_test_abc", "pk_test_abc", "whsec_abc")
            .with_api_base_url(server.uri());
        StripeAdapter::new(config).unwrap()
    }

    fn request() -> IntentRequest {
        IntentRequest {
            order_id: "ord_1".into(),
            order_number: "ORD-20260101-ABCDEF12".into(),
            amount: 5725,
            currency: Currency::USD,
            idempotency_key: "pay_abc".into(),
        }
    }

    fn intent(status: &str, amount_received: i64) -> serde_json::Value {
        json!({
            "id": "pi_123",
            "object": "payment_intent",
            "status": status,
            "amount": 5725,
            "amount_received": amount_received,
            "currency": "usd",
            "client_secret": "pi_123_secret_456",
            "metadata": { "order_id": "ord_1" }
        })
    }

    #[tokio::test]
    async fn test_create_intent_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("Idempotency-Key", "pay_abc"))
            .and(header("Authorization", "Bearer sk_test_abc"))
            .and(body_string_contains("amount=5725"))
            .and(body_string_contains("currency=usd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("requires_payment_method", 0)))
            .expect(1)
            .mount(&server)
            .await;

        let handle = adapter(&server).create_intent(&request()).await.unwrap();
        assert_eq!(handle.intent_id, "pi_123");
        assert_eq!(handle.client_token, "pi_123_secret_456");
        assert_eq!(handle.method, PaymentMethod::Stripe);
    }

    #[tokio::test]
    async fn test_verify_succeeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("succeeded", 5725)))
            .mount(&server)
            .await;

        let verified = adapter(&server).verify_confirmation("pi_123").await.unwrap();
        assert_eq!(verified.transaction_id, "pi_123");
        assert_eq!(verified.amount_confirmed, 5725);
        assert_eq!(verified.currency, Some(Currency::USD));
        assert_eq!(verified.order_ref.as_deref(), Some("ord_1"));
    }

    #[tokio::test]
    async fn test_verify_processing_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("processing", 0)))
            .mount(&server)
            .await;

        let err = adapter(&server).verify_confirmation("pi_123").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_verify_canceled_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("canceled", 0)))
            .mount(&server)
            .await;

        assert!(matches!(
            adapter(&server).verify_confirmation("pi_123").await,
            Err(CheckoutError::ProviderRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_failures_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "type": "invalid_request_error", "message": "No such payment_intent" }
            })))
            .mount(&server)
            .await;

        let stripe = adapter(&server);
        assert!(matches!(
            stripe.verify_confirmation("pi_down").await,
            Err(CheckoutError::ProviderUnavailable { .. })
        ));
        assert_eq!(
            stripe.verify_confirmation("pi_missing").await,
            Err(CheckoutError::ProviderRejected {
                provider: "stripe".into(),
                message: "No such payment_intent".into()
            })
        );
    }

    #[tokio::test]
    async fn test_rejects_non_intent_token() {
        let server = MockServer::start().await;
        assert!(matches!(
            adapter(&server).verify_confirmation("../v1/charges").await,
            Err(CheckoutError::ProviderRejected { .. })
        ));
    }

    #[test]
    fn test_classify_rate_limit() {
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(!classify_failure(StatusCode::PAYMENT_REQUIRED, "").is_retryable());
    }
}
