//! # Pricing
//!
//! `PriceEngine` turns cart lines into frozen order totals.
//! Shipping and tax are injected as rules; the engine only sums and rounds.
//! Everything is integer minor units.

use crate::cart::CartLine;
use crate::error::{CheckoutError, CheckoutResult};
use crate::money::{round_half_up_div, Currency};
use crate::order::ShippingAddress;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Shipping cost collaborator. Must be a pure function of its inputs.
pub trait ShippingRule: Send + Sync {
    /// Shipping cost in minor units
    fn cost(&self, lines: &[CartLine], address: &ShippingAddress) -> CheckoutResult<i64>;
}

/// Tax collaborator. Must be a pure function of its inputs.
pub trait TaxRule: Send + Sync {
    /// Tax amount in minor units
    fn amount(&self, lines: &[CartLine], address: &ShippingAddress) -> CheckoutResult<i64>;
}

/// Computed totals, frozen into an order at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
}

/// Stateless price computation
pub struct PriceEngine;

impl PriceEngine {
    /// Sum of `unit_price * quantity` over all lines
    pub fn subtotal(lines: &[CartLine]) -> CheckoutResult<i64> {
        lines.iter().try_fold(0_i64, |acc, line| {
            line.total()
                .and_then(|t| acc.checked_add(t))
                .ok_or_else(|| overflow("subtotal"))
        })
    }

    /// Round a value expressed in `1/scale` minor units to whole minor units
    /// (round-half-up).
    pub fn round_minor(value: i64, scale: i64) -> CheckoutResult<i64> {
        round_half_up_div(value, scale)
    }

    /// Compute totals for a set of lines
    pub fn compute(
        lines: &[CartLine],
        address: &ShippingAddress,
        shipping_rule: &dyn ShippingRule,
        tax_rule: &dyn TaxRule,
    ) -> CheckoutResult<Totals> {
        for line in lines {
            if line.unit_price < 0 {
                return Err(CheckoutError::InvalidAmount {
                    message: format!("negative unit price on line {}", line.line_id),
                });
            }
            if line.quantity == 0 {
                return Err(CheckoutError::InvalidQuantity { quantity: 0 });
            }
        }

        let subtotal = Self::subtotal(lines)?;
        let shipping = non_negative("shipping", shipping_rule.cost(lines, address)?)?;
        let tax = non_negative("tax", tax_rule.amount(lines, address)?)?;

        let total = subtotal
            .checked_add(shipping)
            .and_then(|t| t.checked_add(tax))
            .ok_or_else(|| overflow("total"))?;

        Ok(Totals {
            subtotal,
            shipping,
            tax,
            total,
        })
    }
}

fn overflow(what: &str) -> CheckoutError {
    CheckoutError::InvalidAmount {
        message: format!("{} overflows", what),
    }
}

fn non_negative(what: &str, amount: i64) -> CheckoutResult<i64> {
    if amount < 0 {
        return Err(CheckoutError::InvalidAmount {
            message: format!("{} rule returned negative amount {}", what, amount),
        });
    }
    Ok(amount)
}

// =============================================================================
// Built-in rules
// =============================================================================

/// Flat shipping, optionally free above a subtotal threshold
#[derive(Debug, Clone, Copy)]
pub struct FlatRateShipping {
    pub rate: i64,
    pub free_over: Option<i64>,
}

impl ShippingRule for FlatRateShipping {
    fn cost(&self, lines: &[CartLine], _address: &ShippingAddress) -> CheckoutResult<i64> {
        if let Some(threshold) = self.free_over {
            if PriceEngine::subtotal(lines)? >= threshold {
                return Ok(0);
            }
        }
        Ok(self.rate)
    }
}

/// Tax as a percentage of subtotal, in basis points (450 = 4.5%)
#[derive(Debug, Clone, Copy)]
pub struct PercentageTax {
    pub rate_bps: i64,
}

impl TaxRule for PercentageTax {
    fn amount(&self, lines: &[CartLine], _address: &ShippingAddress) -> CheckoutResult<i64> {
        let scaled = PriceEngine::subtotal(lines)?
            .checked_mul(self.rate_bps)
            .ok_or_else(|| overflow("tax"))?;
        PriceEngine::round_minor(scaled, 10_000)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Pricing configuration (loaded from `config/pricing.toml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub shipping: ShippingConfig,
    #[serde(default)]
    pub tax: TaxConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingConfig {
    #[serde(default = "default_flat_rate")]
    pub flat_rate: i64,
    #[serde(default)]
    pub free_over: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxConfig {
    #[serde(default)]
    pub rate_bps: i64,
}

fn default_flat_rate() -> i64 {
    500
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            flat_rate: default_flat_rate(),
            free_over: None,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: Currency::USD,
            shipping: ShippingConfig::default(),
            tax: TaxConfig::default(),
        }
    }
}

impl PricingConfig {
    /// Parse from a TOML string
    pub fn from_toml(toml_str: &str) -> CheckoutResult<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| CheckoutError::Configuration(format!("invalid pricing config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, falling back to defaults if the file does not exist
    pub fn load(path: impl AsRef<Path>) -> CheckoutResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml(&content)?;
                tracing::info!(path = %path.display(), "Loaded pricing config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No pricing config found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(CheckoutError::Configuration(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn validate(&self) -> CheckoutResult<()> {
        if self.shipping.flat_rate < 0 {
            return Err(CheckoutError::Configuration(
                "shipping.flat_rate must be >= 0".to_string(),
            ));
        }
        if !(0..=10_000).contains(&self.tax.rate_bps) {
            return Err(CheckoutError::Configuration(
                "tax.rate_bps must be between 0 and 10000".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the rule set described by this config
    pub fn rules(&self) -> PricingRules {
        PricingRules {
            currency: self.currency,
            shipping: Arc::new(FlatRateShipping {
                rate: self.shipping.flat_rate,
                free_over: self.shipping.free_over,
            }),
            tax: Arc::new(PercentageTax {
                rate_bps: self.tax.rate_bps,
            }),
        }
    }
}

/// Rules the ledger prices orders with
#[derive(Clone)]
pub struct PricingRules {
    pub currency: Currency,
    pub shipping: Arc<dyn ShippingRule>,
    pub tax: Arc<dyn TaxRule>,
}

impl PricingRules {
    pub fn new(
        currency: Currency,
        shipping: Arc<dyn ShippingRule>,
        tax: Arc<dyn TaxRule>,
    ) -> Self {
        Self {
            currency,
            shipping,
            tax,
        }
    }

    /// Compute totals with these rules
    pub fn compute(&self, lines: &[CartLine], address: &ShippingAddress) -> CheckoutResult<Totals> {
        PriceEngine::compute(lines, address, self.shipping.as_ref(), self.tax.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, unit_price: i64, quantity: u32) -> CartLine {
        CartLine {
            line_id: id.into(),
            product_id: "p1".into(),
            variant_id: "v1".into(),
            display_name: "Item".into(),
            variant_name: String::new(),
            unit_price,
            quantity,
        }
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            recipient: "Ada Lovelace".into(),
            street: "1 Analytical Way".into(),
            city: "London".into(),
            state: "LDN".into(),
            postal_code: "N1".into(),
            country: "GB".into(),
            phone: "+440000".into(),
        }
    }

    #[test]
    fn test_scenario_totals() {
        let lines = vec![line("l1", 2500, 2)];
        let totals = PriceEngine::compute(
            &lines,
            &address(),
            &FlatRateShipping {
                rate: 500,
                free_over: None,
            },
            &PercentageTax { rate_bps: 450 },
        )
        .unwrap();

        assert_eq!(
            totals,
            Totals {
                subtotal: 5000,
                shipping: 500,
                tax: 225,
                total: 5725
            }
        );
    }

    #[test]
    fn test_tax_rounds_half_up() {
        // 1111 * 4.5% = 49.995 -> 50
        let lines = vec![line("l1", 1111, 1)];
        let tax = PercentageTax { rate_bps: 450 }
            .amount(&lines, &address())
            .unwrap();
        assert_eq!(tax, 50);
    }

    #[test]
    fn test_free_shipping_threshold() {
        let rule = FlatRateShipping {
            rate: 500,
            free_over: Some(10_000),
        };
        assert_eq!(rule.cost(&[line("l1", 9_999, 1)], &address()).unwrap(), 500);
        assert_eq!(rule.cost(&[line("l1", 5_000, 2)], &address()).unwrap(), 0);
    }

    #[test]
    fn test_deterministic() {
        let lines = vec![line("l1", 1999, 3), line("l2", 250, 7)];
        let rules = PricingConfig::default().rules();
        let a = rules.compute(&lines, &address()).unwrap();
        let b = rules.compute(&lines, &address()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.subtotal, 1999 * 3 + 250 * 7);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let lines = vec![line("l1", i64::MAX, 1), line("l2", 1, 1)];
        assert!(matches!(
            PriceEngine::subtotal(&lines),
            Err(CheckoutError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_pricing_config_from_toml() {
        let config = PricingConfig::from_toml(
            r#"
currency = "eur"

[shipping]
flat_rate = 700
free_over = 5000

[tax]
rate_bps = 2000
"#,
        )
        .unwrap();

        assert_eq!(config.currency, Currency::EUR);
        assert_eq!(config.shipping.free_over, Some(5000));
        assert_eq!(config.tax.rate_bps, 2000);

        assert!(PricingConfig::from_toml("[tax]\nrate_bps = 20000").is_err());
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let config = PricingConfig::load("does/not/exist/pricing.toml").unwrap();
        assert_eq!(config, PricingConfig::default());
    }
}
