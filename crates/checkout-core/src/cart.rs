//! # Cart Types
//!
//! Shopping cart and cart line types for checkout-rs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A line in a cart (and, once snapshotted, in an order)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Stable line identifier, survives quantity increments
    pub line_id: String,

    /// Product ID
    pub product_id: String,

    /// Variant ID (size, colour, ...)
    pub variant_id: String,

    /// Product name (denormalized for display)
    pub display_name: String,

    /// Variant name (denormalized for display)
    #[serde(default)]
    pub variant_name: String,

    /// Unit price in minor units, captured when the line was added
    pub unit_price: i64,

    /// Quantity, always >= 1
    pub quantity: u32,
}

impl CartLine {
    /// Line total in minor units, `None` on overflow
    pub fn total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }

    fn matches(&self, product_id: &str, variant_id: &str) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }
}

/// Input for `CartStore::add_line`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLine {
    pub product_id: String,
    pub variant_id: String,
    pub display_name: String,
    #[serde(default)]
    pub variant_name: String,
    /// Catalog price at the moment the buyer added the item
    pub unit_price: i64,
    pub quantity: i64,
}

/// One owner's cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Owner of this cart
    pub owner_id: String,

    /// Lines in insertion order
    pub lines: Vec<CartLine>,

    /// Monotonic counter bumped on every mutation
    pub revision: u64,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Create an empty cart at revision 0
    pub fn empty(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            lines: Vec::new(),
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    /// Check if cart has no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of units across lines
    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    /// Find a line by its id
    pub fn line(&self, line_id: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    pub(crate) fn line_mut(&mut self, line_id: &str) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|l| l.line_id == line_id)
    }

    pub(crate) fn line_for_mut(
        &mut self,
        product_id: &str,
        variant_id: &str,
    ) -> Option<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|l| l.matches(product_id, variant_id))
    }

    pub(crate) fn push_line(&mut self, line: &NewLine, quantity: u32) {
        self.lines.push(CartLine {
            line_id: Uuid::new_v4().to_string(),
            product_id: line.product_id.clone(),
            variant_id: line.variant_id.clone(),
            display_name: line.display_name.clone(),
            variant_name: line.variant_name.clone(),
            unit_price: line.unit_price,
            quantity,
        });
    }
}
