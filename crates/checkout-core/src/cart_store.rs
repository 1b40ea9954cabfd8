//! # Cart Store
//!
//! Owner-keyed cart storage. Each owner's cart sits behind its own mutex so
//! mutations for one owner are serialized while different owners never
//! contend. Every mutation bumps `Cart::revision`; callers that pass an
//! expected revision get optimistic concurrency on top of that.

use crate::cart::{Cart, CartLine, NewLine};
use crate::error::{CheckoutError, CheckoutResult};
use crate::lock;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Largest revision a client may push; stays exact as a JSON number
pub const MAX_REVISION: u64 = 1 << 53;

/// Result of reconciling an incoming cart copy against the stored one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Incoming copy was newer and replaced the stored cart
    AdoptedIncoming(Cart),
    /// Stored cart is at least as new; the sender should take it
    KeptStored(Cart),
}

impl Reconciliation {
    pub fn cart(&self) -> &Cart {
        match self {
            Reconciliation::AdoptedIncoming(cart) | Reconciliation::KeptStored(cart) => cart,
        }
    }
}

/// Carts keyed by owner id
#[derive(Default)]
pub struct CartStore {
    carts: Mutex<HashMap<String, Arc<Mutex<Cart>>>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner's slot, created empty on first access
    fn slot(&self, owner_id: &str) -> Arc<Mutex<Cart>> {
        let mut carts = lock(&self.carts);
        carts
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Cart::empty(owner_id))))
            .clone()
    }

    /// Apply `f` to a copy of the cart and commit it only if `f` succeeds
    fn mutate<F>(&self, owner_id: &str, expected_revision: Option<u64>, f: F) -> CheckoutResult<Cart>
    where
        F: FnOnce(&mut Cart) -> CheckoutResult<()>,
    {
        let slot = self.slot(owner_id);
        let mut cart = lock(&slot);

        if let Some(expected) = expected_revision {
            if expected != cart.revision {
                debug!(owner_id, expected, current = cart.revision, "Stale cart revision");
                return Err(CheckoutError::StaleRevision {
                    expected,
                    current: cart.revision,
                });
            }
        }

        let mut next = cart.clone();
        f(&mut next)?;
        next.revision = next_revision(cart.revision)?;
        next.updated_at = Utc::now();
        *cart = next.clone();
        Ok(next)
    }

    /// Current cart (empty at revision 0 if the owner has none yet)
    pub fn get(&self, owner_id: &str) -> Cart {
        let slot = self.slot(owner_id);
        let cart = lock(&slot);
        cart.clone()
    }

    /// Append a line, or increment the existing line for the same product+variant.
    ///
    /// An incremented line takes the newly supplied unit price.
    pub fn add_line(
        &self,
        owner_id: &str,
        line: NewLine,
        expected_revision: Option<u64>,
    ) -> CheckoutResult<Cart> {
        let quantity = positive_quantity(line.quantity)?;
        if line.unit_price < 0 {
            return Err(CheckoutError::InvalidAmount {
                message: format!("negative unit price {}", line.unit_price),
            });
        }

        self.mutate(owner_id, expected_revision, |cart| {
            match cart.line_for_mut(&line.product_id, &line.variant_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.checked_add(quantity).ok_or(
                        CheckoutError::InvalidQuantity {
                            quantity: line.quantity,
                        },
                    )?;
                    existing.unit_price = line.unit_price;
                }
                None => cart.push_line(&line, quantity),
            }
            Ok(())
        })
    }

    /// Set a line's quantity; 0 removes the line
    pub fn set_quantity(
        &self,
        owner_id: &str,
        line_id: &str,
        quantity: i64,
        expected_revision: Option<u64>,
    ) -> CheckoutResult<Cart> {
        if quantity < 0 {
            return Err(CheckoutError::InvalidQuantity { quantity });
        }
        if quantity == 0 {
            return self.remove_line(owner_id, line_id, expected_revision);
        }
        let quantity = positive_quantity(quantity)?;

        self.mutate(owner_id, expected_revision, |cart| {
            let line = cart
                .line_mut(line_id)
                .ok_or_else(|| CheckoutError::LineNotFound {
                    line_id: line_id.to_string(),
                })?;
            line.quantity = quantity;
            Ok(())
        })
    }

    /// Remove a line. Removing the last line leaves an empty cart.
    pub fn remove_line(
        &self,
        owner_id: &str,
        line_id: &str,
        expected_revision: Option<u64>,
    ) -> CheckoutResult<Cart> {
        self.mutate(owner_id, expected_revision, |cart| {
            let before = cart.lines.len();
            cart.lines.retain(|l| l.line_id != line_id);
            if cart.lines.len() == before {
                return Err(CheckoutError::LineNotFound {
                    line_id: line_id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Empty the cart. Still bumps the revision when already empty.
    pub fn clear(&self, owner_id: &str) -> CheckoutResult<Cart> {
        let slot = self.slot(owner_id);
        let mut cart = lock(&slot);
        let revision = next_revision(cart.revision)?;
        cart.lines.clear();
        cart.revision = revision;
        cart.updated_at = Utc::now();
        info!(owner_id, revision, "Cart cleared");
        Ok(cart.clone())
    }

    /// Last-writer-by-revision: a strictly newer incoming copy replaces the
    /// stored cart, otherwise the stored cart wins.
    ///
    /// The incoming copy must pass the same line rules as `add_line`.
    pub fn reconcile(&self, owner_id: &str, incoming: Cart) -> CheckoutResult<Reconciliation> {
        if incoming.owner_id != owner_id {
            return Err(CheckoutError::InvalidRequest(
                "cart belongs to a different owner".to_string(),
            ));
        }
        if incoming.revision > MAX_REVISION {
            return Err(CheckoutError::InvalidRequest(format!(
                "cart revision {} exceeds {}",
                incoming.revision, MAX_REVISION
            )));
        }
        validate_lines(&incoming.lines)?;

        let slot = self.slot(owner_id);
        let mut cart = lock(&slot);

        if incoming.revision > cart.revision {
            debug!(
                owner_id,
                stored = cart.revision,
                incoming = incoming.revision,
                "Adopting incoming cart"
            );
            *cart = incoming;
            Ok(Reconciliation::AdoptedIncoming(cart.clone()))
        } else {
            Ok(Reconciliation::KeptStored(cart.clone()))
        }
    }
}

fn next_revision(current: u64) -> CheckoutResult<u64> {
    current
        .checked_add(1)
        .ok_or_else(|| CheckoutError::InvalidRequest("cart revision exhausted".to_string()))
}

/// Lines a client pushes must look like lines `add_line` could have built
fn validate_lines(lines: &[CartLine]) -> CheckoutResult<()> {
    let mut line_ids = HashSet::new();
    let mut variants = HashSet::new();

    for line in lines {
        if line.quantity == 0 {
            return Err(CheckoutError::InvalidQuantity { quantity: 0 });
        }
        if line.unit_price < 0 {
            return Err(CheckoutError::InvalidAmount {
                message: format!("negative unit price {}", line.unit_price),
            });
        }
        if line.line_id.trim().is_empty() || !line_ids.insert(line.line_id.as_str()) {
            return Err(CheckoutError::InvalidRequest(format!(
                "duplicate or blank line id '{}'",
                line.line_id
            )));
        }
        if !variants.insert((line.product_id.as_str(), line.variant_id.as_str())) {
            return Err(CheckoutError::InvalidRequest(format!(
                "product {} variant {} appears twice",
                line.product_id, line.variant_id
            )));
        }
    }
    Ok(())
}

fn positive_quantity(quantity: i64) -> CheckoutResult<u32> {
    if quantity <= 0 {
        return Err(CheckoutError::InvalidQuantity { quantity });
    }
    u32::try_from(quantity).map_err(|_| CheckoutError::InvalidQuantity { quantity })
}
