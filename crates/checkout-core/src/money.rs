//! # Money
//!
//! Currencies and integer minor-unit arithmetic.
//! Amounts are always `i64` in the currency's smallest unit (cents for USD);
//! nothing in this crate touches floating point.

use crate::error::{CheckoutError, CheckoutResult};
use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
    JPY,
    CAD,
    AUD,
    CHF,
    MXN,
}

impl Currency {
    /// Returns the lowercase ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::JPY => "jpy",
            Currency::CAD => "cad",
            Currency::AUD => "aud",
            Currency::CHF => "chf",
            Currency::MXN => "mxn",
        }
    }

    /// Uppercase ISO code, as PayPal expects it
    pub fn code(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, most others have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Parse a lowercase or uppercase ISO code
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "usd" => Some(Currency::USD),
            "eur" => Some(Currency::EUR),
            "gbp" => Some(Currency::GBP),
            "jpy" => Some(Currency::JPY),
            "cad" => Some(Currency::CAD),
            "aud" => Some(Currency::AUD),
            "chf" => Some(Currency::CHF),
            "mxn" => Some(Currency::MXN),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Divide with round-half-up at the integer boundary.
///
/// Used by rules that work in fractional minor units (e.g. basis points).
/// `denominator` must be positive.
pub fn round_half_up_div(numerator: i64, denominator: i64) -> CheckoutResult<i64> {
    if denominator <= 0 {
        return Err(CheckoutError::InvalidAmount {
            message: format!("non-positive denominator {}", denominator),
        });
    }
    let n = i128::from(numerator);
    let d = i128::from(denominator);
    let q = n.div_euclid(d);
    let r = n.rem_euclid(d);
    let rounded = if r * 2 >= d { q + 1 } else { q };
    i64::try_from(rounded).map_err(|_| CheckoutError::InvalidAmount {
        message: "rounded amount overflows".to_string(),
    })
}

/// Render minor units as a plain decimal string ("5725" -> "57.25")
pub fn format_minor(amount: i64, currency: Currency) -> String {
    let places = currency.decimal_places();
    if places == 0 {
        return amount.to_string();
    }
    let divisor = 10_i64.pow(places);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let whole = abs / divisor as u64;
    let frac = abs % divisor as u64;
    format!("{}{}.{:0width$}", sign, whole, frac, width = places as usize)
}

/// Parse a decimal string from a provider ("57.25") into minor units.
///
/// Rejects more fractional digits than the currency carries instead of rounding.
pub fn parse_minor(value: &str, currency: Currency) -> CheckoutResult<i64> {
    let invalid = || CheckoutError::InvalidAmount {
        message: format!("cannot parse '{}' as {}", value, currency),
    };

    let trimmed = value.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let places = currency.decimal_places() as usize;
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    if whole.is_empty() || frac.len() > places {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let frac_padded = format!("{:0<width$}", frac, width = places);
    let frac: i64 = if places == 0 {
        0
    } else {
        frac_padded.parse().map_err(|_| invalid())?
    };

    let minor = whole
        .checked_mul(10_i64.pow(places as u32))
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(invalid)?;

    Ok(if negative { -minor } else { minor })
}
