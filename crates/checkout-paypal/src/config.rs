//! # PayPal Configuration
//!
//! Credentials are loaded from environment variables.

use checkout_core::CheckoutError;
use std::env;
use std::str::FromStr;

/// PayPal environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaypalMode {
    #[default]
    Sandbox,
    Live,
}

impl PaypalMode {
    pub fn api_base_url(&self) -> &'static str {
        match self {
            PaypalMode::Sandbox => "https://api-m.sandbox.paypal.com",
            PaypalMode::Live => "https://api-m.paypal.com",
        }
    }
}

impl FromStr for PaypalMode {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(PaypalMode::Sandbox),
            "live" => Ok(PaypalMode::Live),
            other => Err(CheckoutError::Configuration(format!(
                "PAYPAL_MODE must be sandbox or live, got '{}'",
                other
            ))),
        }
    }
}

/// PayPal REST API configuration
#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: PaypalMode,
    /// API base URL (derived from `mode`, overridable for mocking)
    pub api_base_url: String,
}

impl PaypalConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `PAYPAL_CLIENT_ID`
    /// - `PAYPAL_CLIENT_SECRET`
    ///
    /// Optional: `PAYPAL_MODE` (`sandbox` | `live`, default `sandbox`)
    pub fn from_env() -> Result<Self, CheckoutError> {
        dotenvy::dotenv().ok();

        let client_id = env::var("PAYPAL_CLIENT_ID")
            .map_err(|_| CheckoutError::Configuration("PAYPAL_CLIENT_ID not set".to_string()))?;
        let client_secret = env::var("PAYPAL_CLIENT_SECRET").map_err(|_| {
            CheckoutError::Configuration("PAYPAL_CLIENT_SECRET not set".to_string())
        })?;
        let mode = match env::var("PAYPAL_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => PaypalMode::default(),
        };

        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return Err(CheckoutError::Configuration(
                "PayPal credentials must not be empty".to_string(),
            ));
        }

        Ok(Self::new(client_id, client_secret, mode))
    }

    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        mode: PaypalMode,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            mode,
            api_base_url: mode.api_base_url().to_string(),
        }
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_base_urls() {
        let sandbox = PaypalConfig::new("id", "secret", PaypalMode::Sandbox);
        assert_eq!(sandbox.api_base_url, "https://api-m.sandbox.paypal.com");

        let live = PaypalConfig::new("id", "secret", PaypalMode::Live);
        assert_eq!(live.api_base_url, "https://api-m.paypal.com");
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("LIVE".parse::<PaypalMode>().unwrap(), PaypalMode::Live);
        assert!("production".parse::<PaypalMode>().is_err());
    }
}
