//! Cart model and its pure state transitions.
//!
//! A line item is identified by `(product, size, color)` rather than a
//! synthetic line ID. Adding a line whose key already exists merges the
//! quantities into the existing line, so the cart never holds two lines with
//! the same key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::ProductId;
use super::price::{CurrencyCode, Price};

/// Errors raised by cart mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// Line quantities must be at least one.
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    /// All lines in a cart share one currency.
    #[error("cart is priced in {cart:?}, item is priced in {item:?}")]
    CurrencyMismatch {
        /// Currency of the existing lines.
        cart: CurrencyCode,
        /// Currency of the rejected item.
        item: CurrencyCode,
    },
}

/// Product variant selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub size: String,
    pub color: String,
}

impl Variant {
    #[must_use]
    pub fn new(size: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            size: size.into(),
            color: color.into(),
        }
    }
}

/// Identity of a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartKey {
    pub product_id: ProductId,
    pub size: String,
    pub color: String,
}

impl CartKey {
    #[must_use]
    pub fn new(
        product_id: impl Into<ProductId>,
        size: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            size: size.into(),
            color: color.into(),
        }
    }
}

/// Presentational data carried with a line (name, thumbnail).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A single cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub product_id: ProductId,
    pub variant: Variant,
    pub quantity: u32,
    pub unit_price: Price,
    #[serde(default)]
    pub display: DisplayFields,
}

impl CartLineItem {
    /// Build a line item, rejecting a zero quantity.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` if `quantity` is zero.
    pub fn new(
        product_id: impl Into<ProductId>,
        variant: Variant,
        quantity: u32,
        unit_price: Price,
        display: DisplayFields,
    ) -> Result<Self, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        Ok(Self {
            product_id: product_id.into(),
            variant,
            quantity,
            unit_price,
            display,
        })
    }

    /// The identity key of this line.
    #[must_use]
    pub fn key(&self) -> CartKey {
        CartKey {
            product_id: self.product_id.clone(),
            size: self.variant.size.clone(),
            color: self.variant.color.clone(),
        }
    }

    fn matches(&self, key: &CartKey) -> bool {
        self.product_id == key.product_id
            && self.variant.size == key.size
            && self.variant.color == key.color
    }

    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// Outcome of a quantity update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    /// The line now has the requested quantity.
    Updated,
    /// A zero quantity removed the line.
    Removed,
    /// No line has that key; nothing changed.
    Missing,
}

/// Ordered set of line items, unique by [`CartKey`].
///
/// Serializes as a plain array of lines. Deserialization re-applies the merge
/// rules, so persisted data with duplicate keys or zero quantities collapses
/// into a valid cart instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CartLineItem>", into = "Vec<CartLineItem>")]
pub struct Cart {
    items: Vec<CartLineItem>,
}

impl Cart {
    /// Create an empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Lines in insertion order.
    #[must_use]
    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a line by key.
    #[must_use]
    pub fn get(&self, key: &CartKey) -> Option<&CartLineItem> {
        self.items.iter().find(|line| line.matches(key))
    }

    /// Add a line, merging into an existing line with the same key.
    ///
    /// On merge the quantities are summed and the price and display fields
    /// are refreshed from the incoming item. Returns a copy of the resulting
    /// line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` for a zero quantity and
    /// `CartError::CurrencyMismatch` if the item's currency differs from the
    /// cart's.
    pub fn add(&mut self, item: CartLineItem) -> Result<CartLineItem, CartError> {
        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        if let Some(cart) = self.currency()
            && cart != item.unit_price.currency_code
        {
            return Err(CartError::CurrencyMismatch {
                cart,
                item: item.unit_price.currency_code,
            });
        }

        let key = item.key();
        if let Some(line) = self.items.iter_mut().find(|line| line.matches(&key)) {
            line.quantity = line.quantity.saturating_add(item.quantity);
            line.unit_price = item.unit_price;
            line.display = item.display;
            return Ok(line.clone());
        }
        self.items.push(item.clone());
        Ok(item)
    }

    /// Remove the line with exactly this key.
    pub fn remove(&mut self, key: &CartKey) -> Option<CartLineItem> {
        let index = self.items.iter().position(|line| line.matches(key))?;
        Some(self.items.remove(index))
    }

    /// Set a line's quantity; zero removes the line.
    pub fn set_quantity(&mut self, key: &CartKey, quantity: u32) -> QuantityChange {
        if quantity == 0 {
            return if self.remove(key).is_some() {
                QuantityChange::Removed
            } else {
                QuantityChange::Missing
            };
        }
        match self.items.iter_mut().find(|line| line.matches(key)) {
            Some(line) => {
                line.quantity = quantity;
                QuantityChange::Updated
            }
            None => QuantityChange::Missing,
        }
    }

    /// Remove every line. Returns whether anything was removed.
    pub fn clear(&mut self) -> bool {
        let had_items = !self.items.is_empty();
        self.items.clear();
        had_items
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |sum, line| sum.saturating_add(line.quantity))
    }

    /// Sum of all line totals. An empty cart is zero in the default currency.
    #[must_use]
    pub fn subtotal(&self) -> Price {
        let currency = self.currency().unwrap_or_default();
        self.items
            .iter()
            .fold(Price::zero(currency), |mut total, line| {
                total.amount += line.line_total().amount;
                total
            })
    }

    fn currency(&self) -> Option<CurrencyCode> {
        self.items.first().map(|line| line.unit_price.currency_code)
    }
}

impl From<Vec<CartLineItem>> for Cart {
    fn from(items: Vec<CartLineItem>) -> Self {
        let mut cart = Self::new();
        for item in items {
            // Invalid persisted lines are dropped rather than failing the load.
            let _ = cart.add(item);
        }
        cart
    }
}

impl From<Cart> for Vec<CartLineItem> {
    fn from(cart: Cart) -> Self {
        cart.items
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn line(product: &str, size: &str, color: &str, quantity: u32) -> CartLineItem {
        CartLineItem::new(
            product,
            Variant::new(size, color),
            quantity,
            Price::from_minor_units(2500, CurrencyCode::USD),
            DisplayFields {
                name: format!("{product} tee"),
                image: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_add_same_key_merges_quantity() {
        let mut cart = Cart::new();
        cart.add(line("P1", "M", "red", 1)).unwrap();
        cart.add(line("P1", "M", "red", 1)).unwrap();

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 2);
    }

    #[test]
    fn test_add_distinct_variants_are_separate_lines() {
        let mut cart = Cart::new();
        cart.add(line("P1", "M", "red", 1)).unwrap();
        cart.add(line("P1", "M", "blue", 1)).unwrap();
        cart.add(line("P1", "L", "red", 1)).unwrap();

        assert_eq!(cart.items().len(), 3);
        assert_eq!(cart.item_count(), 3);
    }

    #[test]
    fn test_merge_refreshes_price_and_display() {
        let mut cart = Cart::new();
        cart.add(line("P1", "M", "red", 1)).unwrap();

        let mut repriced = line("P1", "M", "red", 2);
        repriced.unit_price = Price::from_minor_units(2000, CurrencyCode::USD);
        repriced.display.name = "Renamed tee".to_string();
        let merged = cart.add(repriced).unwrap();
        assert_eq!(cart.get(&merged.key()), Some(&merged));

        assert_eq!(merged.quantity, 3);
        assert_eq!(merged.unit_price.to_string(), "$20.00");
        assert_eq!(merged.display.name, "Renamed tee");
    }

    #[test]
    fn test_remove_targets_exact_key() {
        let mut cart = Cart::new();
        cart.add(line("P1", "M", "red", 1)).unwrap();
        cart.add(line("P1", "M", "blue", 1)).unwrap();

        let removed = cart.remove(&CartKey::new("P1", "M", "red")).unwrap();
        assert_eq!(removed.variant.color, "red");
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].variant.color, "blue");

        assert!(cart.remove(&CartKey::new("P1", "S", "blue")).is_none());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let result = CartLineItem::new(
            "P1",
            Variant::new("M", "red"),
            0,
            Price::zero(CurrencyCode::USD),
            DisplayFields::default(),
        );
        assert_eq!(result.unwrap_err(), CartError::InvalidQuantity);
    }

    #[test]
    fn test_set_quantity() {
        let mut cart = Cart::new();
        cart.add(line("P1", "M", "red", 1)).unwrap();
        let key = CartKey::new("P1", "M", "red");

        assert_eq!(cart.set_quantity(&key, 5), QuantityChange::Updated);
        assert_eq!(cart.get(&key).unwrap().quantity, 5);

        assert_eq!(cart.set_quantity(&key, 0), QuantityChange::Removed);
        assert!(cart.is_empty());

        assert_eq!(cart.set_quantity(&key, 2), QuantityChange::Missing);
    }

    #[test]
    fn test_currency_mismatch_rejected() {
        let mut cart = Cart::new();
        cart.add(line("P1", "M", "red", 1)).unwrap();

        let mut euro = line("P2", "M", "red", 1);
        euro.unit_price.currency_code = CurrencyCode::EUR;
        assert_eq!(
            cart.add(euro).unwrap_err(),
            CartError::CurrencyMismatch {
                cart: CurrencyCode::USD,
                item: CurrencyCode::EUR,
            }
        );
        assert_eq!(cart.items().len(), 1);
    }

    #[test]
    fn test_subtotal_and_count() {
        let mut cart = Cart::new();
        assert_eq!(cart.subtotal().to_string(), "$0.00");

        cart.add(line("P1", "M", "red", 2)).unwrap();
        cart.add(line("P2", "S", "black", 1)).unwrap();
        assert_eq!(cart.item_count(), 3);
        assert_eq!(cart.subtotal().to_string(), "$75.00");
    }

    #[test]
    fn test_deserialize_collapses_duplicates() {
        let json = serde_json::json!([
            {
                "productId": "P1",
                "variant": { "size": "M", "color": "red" },
                "quantity": 1,
                "unitPrice": { "amount": "25.00", "currencyCode": "USD" }
            },
            {
                "productId": "P1",
                "variant": { "size": "M", "color": "red" },
                "quantity": 2,
                "unitPrice": { "amount": "25.00", "currencyCode": "USD" }
            },
            {
                "productId": "P9",
                "variant": { "size": "M", "color": "red" },
                "quantity": 0,
                "unitPrice": { "amount": "1.00", "currencyCode": "USD" }
            }
        ]);
        let cart: Cart = serde_json::from_value(json).unwrap();

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
    }
}
