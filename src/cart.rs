//! Shopping cart.
//!
//! One line per distinct (product, size, special, notes) variant; adding an
//! identical variant sums quantities. Unit prices are resolved from the
//! menu when a line is created and stay frozen after that. Validation
//! failures leave the cart untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PosError, PosResult};
use crate::menu::{MenuItem, Size};
use crate::round_money;
use crate::storage::{self, KeyValueStore};

/// Added to the unit price of a "No Ice" drink.
pub const NO_ICE_SURCHARGE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Special {
    #[default]
    None,
    #[serde(rename = "No Ice", alias = "NoIce")]
    NoIce,
}

impl Special {
    pub fn label(self) -> &'static str {
        match self {
            Special::None => "None",
            Special::NoIce => "No Ice",
        }
    }

    pub fn surcharge(self) -> f64 {
        match self {
            Special::None => 0.0,
            Special::NoIce => NO_ICE_SURCHARGE,
        }
    }
}

impl fmt::Display for Special {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the customer picked in the product modal.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRequest {
    pub product_id: i64,
    pub size: Size,
    pub special: Special,
    pub notes: String,
    pub qty: u32,
}

impl LineRequest {
    pub fn new(product_id: i64, size: Size, qty: u32) -> Self {
        Self {
            product_id,
            size,
            special: Special::None,
            notes: String::new(),
            qty,
        }
    }

    pub fn with_special(mut self, special: Special) -> Self {
        self.special = special;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub cart_id: String,
    pub product_id: i64,
    pub name: String,
    pub size: Size,
    #[serde(default)]
    pub special: Special,
    #[serde(default)]
    pub notes: String,
    pub qty: u32,
    pub unit_price: f64,
    /// Tier minimum captured when the line was created.
    pub min_qty: u32,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        self.unit_price * f64::from(self.qty)
    }

    fn same_variant(&self, product_id: i64, size: Size, special: Special, notes: &str) -> bool {
        self.product_id == product_id
            && self.size == size
            && self.special == special
            && self.notes == notes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub subtotal: f64,
    /// Always zero; discounts are disabled.
    pub discount_amount: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    Updated(u32),
    Removed,
    /// The line is at its tier minimum of 2 or more and was left alone.
    BlockedAtMinimum { minimum: u32 },
    Missing,
}

/// Resolved price and minimum for one variant.
struct Resolved<'a> {
    item: &'a MenuItem,
    unit_price: f64,
    min_qty: u32,
}

fn resolve<'a>(menu: &'a [MenuItem], request: &LineRequest) -> PosResult<Resolved<'a>> {
    let item = menu
        .iter()
        .find(|item| item.id == request.product_id)
        .ok_or(PosError::ProductNotFound(request.product_id))?;
    let min_qty = item.minimum_qty(request.size);
    if request.qty < min_qty {
        return Err(PosError::BelowMinimum {
            minimum: min_qty,
            requested: request.qty,
        });
    }
    Ok(Resolved {
        item,
        unit_price: item.price_for(request.size) + request.special.surcharge(),
        min_qty,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, cart_id: &str) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.cart_id == cart_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.qty).sum()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Add a variant, merging into an identical line when there is one.
    /// Returns the cart id of the line that holds it.
    pub fn add_or_update(&mut self, menu: &[MenuItem], request: LineRequest) -> PosResult<String> {
        let resolved = resolve(menu, &request)?;
        let notes = request.notes.trim();

        if let Some(line) = self.lines.iter_mut().find(|line| {
            line.same_variant(request.product_id, request.size, request.special, notes)
        }) {
            line.qty = line.qty.saturating_add(request.qty);
            debug!(cart_id = %line.cart_id, qty = line.qty, "Cart line merged");
            return Ok(line.cart_id.clone());
        }

        let line = CartLine {
            cart_id: Uuid::new_v4().to_string(),
            product_id: resolved.item.id,
            name: resolved.item.name.clone(),
            size: request.size,
            special: request.special,
            notes: notes.to_string(),
            qty: request.qty,
            unit_price: resolved.unit_price,
            min_qty: resolved.min_qty,
        };
        let cart_id = line.cart_id.clone();
        debug!(cart_id = %cart_id, product_id = line.product_id, qty = line.qty, "Cart line added");
        self.lines.push(line);
        Ok(cart_id)
    }

    /// Replace a line's variant and quantity. The product is the line's own;
    /// `request.product_id` is only used when the line has disappeared, in
    /// which case the request is added as a new line. An edit that lands on
    /// another line's variant merges the two.
    pub fn edit_line(
        &mut self,
        menu: &[MenuItem],
        cart_id: &str,
        request: LineRequest,
    ) -> PosResult<String> {
        let Some(idx) = self.lines.iter().position(|line| line.cart_id == cart_id) else {
            debug!(cart_id, "Edited line is gone, adding as new");
            return self.add_or_update(menu, request);
        };

        let request = LineRequest {
            product_id: self.lines[idx].product_id,
            ..request
        };
        let current = &self.lines[idx];
        // Same size and special keep the frozen price, so the frozen minimum
        // is the one that applies.
        let repriced = if current.size != request.size || current.special != request.special {
            let resolved = resolve(menu, &request)?;
            Some((resolved.unit_price, resolved.min_qty))
        } else if request.qty < current.min_qty {
            return Err(PosError::BelowMinimum {
                minimum: current.min_qty,
                requested: request.qty,
            });
        } else {
            None
        };
        let notes = request.notes.trim().to_string();

        let collision = self.lines.iter().position(|line| {
            line.cart_id != cart_id
                && line.same_variant(request.product_id, request.size, request.special, &notes)
        });
        if let Some(other) = collision {
            self.lines[other].qty = self.lines[other].qty.saturating_add(request.qty);
            let survivor = self.lines[other].cart_id.clone();
            self.lines.remove(idx);
            debug!(cart_id, into = %survivor, "Edited line merged into existing variant");
            return Ok(survivor);
        }

        let line = &mut self.lines[idx];
        if let Some((unit_price, min_qty)) = repriced {
            line.unit_price = unit_price;
            line.min_qty = min_qty;
        }
        line.size = request.size;
        line.special = request.special;
        line.notes = notes;
        line.qty = request.qty;
        Ok(line.cart_id.clone())
    }

    /// Removing an absent line is a no-op; returns whether one was removed.
    pub fn remove_line(&mut self, cart_id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.cart_id != cart_id);
        before != self.lines.len()
    }

    pub fn increment_line(&mut self, cart_id: &str) -> PosResult<u32> {
        let line = self
            .lines
            .iter_mut()
            .find(|line| line.cart_id == cart_id)
            .ok_or_else(|| PosError::LineNotFound(cart_id.to_string()))?;
        line.qty = line.qty.saturating_add(1);
        Ok(line.qty)
    }

    pub fn decrement_line(&mut self, cart_id: &str) -> DecrementOutcome {
        let Some(idx) = self.lines.iter().position(|line| line.cart_id == cart_id) else {
            return DecrementOutcome::Missing;
        };
        let line = &mut self.lines[idx];
        if line.qty > line.min_qty {
            line.qty -= 1;
            return DecrementOutcome::Updated(line.qty);
        }
        if line.min_qty <= 1 {
            self.lines.remove(idx);
            return DecrementOutcome::Removed;
        }
        DecrementOutcome::BlockedAtMinimum {
            minimum: line.min_qty,
        }
    }

    pub fn totals(&self) -> CartTotals {
        let subtotal = round_money(self.lines.iter().map(CartLine::line_total).sum());
        CartTotals {
            subtotal,
            discount_amount: 0.0,
            total: subtotal,
        }
    }

    // -- Saved snapshot ----------------------------------------------------

    pub fn save_snapshot(&self, store: &dyn KeyValueStore, user: &str) -> PosResult<()> {
        let key = storage::cart_key(user);
        if self.lines.is_empty() {
            return storage::remove_key(store, &key);
        }
        storage::write_json(store, &key, &self.lines)
    }

    /// Restore a saved cart; a missing or unreadable snapshot is empty.
    pub fn load_snapshot(store: &dyn KeyValueStore, user: &str) -> Self {
        Self {
            lines: storage::read_json_array(store, &storage::cart_key(user)),
        }
    }

    pub fn clear_snapshot(store: &dyn KeyValueStore, user: &str) -> PosResult<()> {
        storage::remove_key(store, &storage::cart_key(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::default_catalog;
    use crate::storage::MemoryStore;

    const CALAMANSI: i64 = 1;
    const GREEN_DETOX: i64 = 6;

    #[test]
    fn identical_variants_merge_by_summing() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        let with_notes =
            |qty, notes: &str| LineRequest::new(CALAMANSI, Size::Regular, qty).with_notes(notes);
        let a = cart.add_or_update(&menu, with_notes(2, "less sugar")).unwrap();
        let b = cart.add_or_update(&menu, with_notes(3, " less sugar ")).unwrap();
        cart.add_or_update(&menu, with_notes(4, "less sugar")).unwrap();

        assert_eq!(a, b);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].qty, 9);
    }

    #[test]
    fn different_variants_get_separate_lines() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        cart.add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 2)).unwrap();
        cart.add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Tall, 2)).unwrap();
        cart.add_or_update(
            &menu,
            LineRequest::new(CALAMANSI, Size::Regular, 2).with_special(Special::NoIce),
        )
        .unwrap();
        assert_eq!(cart.lines().len(), 3);
        assert_eq!(cart.lines()[2].unit_price, 99.0);
    }

    #[test]
    fn low_tier_item_requires_two() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        let err = cart
            .add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 1))
            .unwrap_err();
        assert!(matches!(err, PosError::BelowMinimum { minimum: 2, requested: 1 }));
        assert!(cart.is_empty());

        cart.add_or_update(&menu, LineRequest::new(GREEN_DETOX, Size::Regular, 1)).unwrap();
        assert_eq!(cart.lines()[0].min_qty, 1);
    }

    #[test]
    fn unknown_product_is_rejected() {
        let mut cart = Cart::new();
        assert!(matches!(
            cart.add_or_update(&default_catalog(), LineRequest::new(99, Size::Regular, 2)),
            Err(PosError::ProductNotFound(99))
        ));
    }

    #[test]
    fn unit_price_is_frozen_after_add() {
        let mut menu = default_catalog();
        let mut cart = Cart::new();
        let id = cart
            .add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 2))
            .unwrap();
        menu[0].price_regular = 150.0;
        cart.add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 2)).unwrap();
        cart.edit_line(&menu, &id, LineRequest::new(CALAMANSI, Size::Regular, 5)).unwrap();
        assert_eq!(cart.lines()[0].unit_price, 79.0);
        assert_eq!(cart.lines()[0].qty, 5);
    }

    #[test]
    fn edit_keeps_frozen_minimum_after_price_rise() {
        let mut menu = default_catalog();
        let mut cart = Cart::new();
        let id = cart
            .add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 2))
            .unwrap();
        menu[0].price_regular = 150.0;

        let err = cart
            .edit_line(&menu, &id, LineRequest::new(CALAMANSI, Size::Regular, 1))
            .unwrap_err();
        assert!(matches!(err, PosError::BelowMinimum { minimum: 2, requested: 1 }));
        let line = &cart.lines()[0];
        assert_eq!((line.qty, line.min_qty, line.unit_price), (2, 2, 79.0));
        assert_eq!(cart.decrement_line(&id), DecrementOutcome::BlockedAtMinimum { minimum: 2 });
    }

    #[test]
    fn decrement_respects_tier_minimum() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        let pair = cart
            .add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 3))
            .unwrap();
        let single = cart
            .add_or_update(&menu, LineRequest::new(GREEN_DETOX, Size::Regular, 1))
            .unwrap();

        assert_eq!(cart.decrement_line(&pair), DecrementOutcome::Updated(2));
        assert_eq!(
            cart.decrement_line(&pair),
            DecrementOutcome::BlockedAtMinimum { minimum: 2 }
        );
        assert_eq!(cart.line(&pair).unwrap().qty, 2);

        assert_eq!(cart.decrement_line(&single), DecrementOutcome::Removed);
        assert!(cart.line(&single).is_none());
        assert_eq!(cart.decrement_line(&single), DecrementOutcome::Missing);
    }

    #[test]
    fn edit_changes_variant_and_merges_collisions() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        let regular = cart
            .add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 2))
            .unwrap();
        let tall = cart
            .add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Tall, 2))
            .unwrap();

        let survivor = cart
            .edit_line(&menu, &regular, LineRequest::new(CALAMANSI, Size::Tall, 3))
            .unwrap();
        assert_eq!(survivor, tall);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].qty, 5);

        let edited = cart
            .edit_line(
                &menu,
                &tall,
                LineRequest::new(CALAMANSI, Size::Regular, 2).with_special(Special::NoIce),
            )
            .unwrap();
        assert_eq!(edited, tall);
        assert_eq!(cart.lines()[0].unit_price, 99.0);
    }

    #[test]
    fn edit_of_vanished_line_adds_it() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        let id = cart
            .edit_line(&menu, "gone", LineRequest::new(GREEN_DETOX, Size::Tall, 1))
            .unwrap();
        assert_ne!(id, "gone");
        assert_eq!(cart.lines().len(), 1);
    }

    #[test]
    fn failed_edit_leaves_line_untouched() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        let id = cart
            .add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 4))
            .unwrap();
        let before = cart.clone();
        assert!(cart
            .edit_line(&menu, &id, LineRequest::new(CALAMANSI, Size::Tall, 1))
            .is_err());
        assert_eq!(cart, before);
    }

    #[test]
    fn remove_is_idempotent() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        let id = cart
            .add_or_update(&menu, LineRequest::new(GREEN_DETOX, Size::Regular, 1))
            .unwrap();
        assert!(cart.remove_line(&id));
        assert!(!cart.remove_line(&id));
        assert!(matches!(cart.increment_line(&id), Err(PosError::LineNotFound(_))));
    }

    #[test]
    fn totals_have_no_discount() {
        let menu = default_catalog();
        let mut cart = Cart::new();
        cart.add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 3)).unwrap();
        cart.add_or_update(
            &menu,
            LineRequest::new(GREEN_DETOX, Size::Tall, 1).with_special(Special::NoIce),
        )
        .unwrap();
        let totals = cart.totals();
        assert_eq!(totals.subtotal, 237.0 + 159.0);
        assert_eq!(totals.discount_amount, 0.0);
        assert_eq!(totals.total, totals.subtotal);
    }

    #[test]
    fn snapshot_roundtrip_and_clear() {
        let store = MemoryStore::new();
        let menu = default_catalog();
        let mut cart = Cart::new();
        cart.add_or_update(&menu, LineRequest::new(CALAMANSI, Size::Regular, 2)).unwrap();
        cart.save_snapshot(&store, "ana@mail.com").unwrap();

        let restored = Cart::load_snapshot(&store, "Ana@Mail.com");
        assert_eq!(restored, cart);

        Cart::clear_snapshot(&store, "ana@mail.com").unwrap();
        assert!(Cart::load_snapshot(&store, "ana@mail.com").is_empty());
    }
}
