//! # Application State
//!
//! Shared state for the Axum application: cart store, order ledger, payment
//! coordinator and the configured providers.

use checkout_core::{
    CartStore, CoordinatorConfig, OrderLedger, PaymentCoordinator, PricingConfig, PricingRules,
    ProviderRegistry,
};
use checkout_paypal::PaypalAdapter;
use checkout_stripe::{StripeAdapter, StripeConfig, StripeWebhookVerifier};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Shared secret for the operator endpoints; unset disables them
    pub operator_api_key: Option<String>,
    /// Path of the pricing TOML
    pub pricing_config: PathBuf,
    /// Seconds an initiated payment may stay unconfirmed
    pub confirmation_window_secs: i64,
    /// Upper bound on a single provider call
    pub provider_timeout_secs: u64,
    /// Interval of the confirmation-window sweeper
    pub expiry_sweep_secs: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 8080),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            operator_api_key: env::var("OPERATOR_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            pricing_config: env::var("PRICING_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/pricing.toml")),
            confirmation_window_secs: env_or("CONFIRMATION_WINDOW_SECS", 1800),
            provider_timeout_secs: env_or("PROVIDER_TIMEOUT_SECS", 15),
            expiry_sweep_secs: env_or("EXPIRY_SWEEP_SECS", 60),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            verify_timeout: Duration::from_secs(self.provider_timeout_secs),
            confirmation_window: chrono::Duration::seconds(self.confirmation_window_secs),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
            operator_api_key: None,
            pricing_config: PathBuf::from("config/pricing.toml"),
            confirmation_window_secs: 1800,
            provider_timeout_secs: 15,
            expiry_sweep_secs: 60,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub carts: Arc<CartStore>,
    pub ledger: Arc<OrderLedger>,
    pub coordinator: Arc<PaymentCoordinator>,
    /// Present when Stripe is configured
    pub stripe_webhook: Option<StripeWebhookVerifier>,
    /// Handed to the browser alongside Stripe client secrets
    pub stripe_publishable_key: Option<String>,
    pub config: AppConfig,
}

impl AppState {
    /// Build the state from environment variables.
    ///
    /// A provider without credentials is not registered; half-configured
    /// providers are an error.
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let pricing = PricingConfig::load(&config.pricing_config)?.rules();

        let mut providers = ProviderRegistry::new();
        let mut stripe_webhook = None;
        let mut stripe_publishable_key = None;

        if env::var("STRIPE_SECRET_KEY").is_ok() {
            let stripe_config = StripeConfig::from_env()
                .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;
            stripe_webhook = Some(StripeWebhookVerifier::new(&stripe_config.webhook_secret));
            stripe_publishable_key = Some(stripe_config.publishable_key.clone());
            providers.register(Arc::new(StripeAdapter::new(stripe_config)?));
        } else {
            info!("STRIPE_SECRET_KEY not set, Stripe disabled");
        }

        if env::var("PAYPAL_CLIENT_ID").is_ok() {
            let paypal = PaypalAdapter::from_env()
                .map_err(|e| anyhow::anyhow!("Failed to initialize PayPal: {}", e))?;
            providers.register(Arc::new(paypal));
        } else {
            info!("PAYPAL_CLIENT_ID not set, PayPal disabled");
        }

        let mut state = Self::from_parts(config, pricing, providers, stripe_webhook);
        state.stripe_publishable_key = stripe_publishable_key;
        Ok(state)
    }

    /// Wire the components together from already-built parts
    pub fn from_parts(
        config: AppConfig,
        pricing: PricingRules,
        providers: ProviderRegistry,
        stripe_webhook: Option<StripeWebhookVerifier>,
    ) -> Self {
        let carts = Arc::new(CartStore::new());
        let ledger = Arc::new(OrderLedger::new(carts.clone(), pricing));
        let coordinator = Arc::new(PaymentCoordinator::new(
            ledger.clone(),
            providers,
            config.coordinator_config(),
        ));

        Self {
            carts,
            ledger,
            coordinator,
            stripe_webhook,
            stripe_publishable_key: None,
            config,
        }
    }
}
