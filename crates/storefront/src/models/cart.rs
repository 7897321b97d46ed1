//! Cart domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use meridian_core::{CartId, CartItemId, CartStatus, ProductId, ProfileId};

/// A shopping cart with its line items.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: CartId,
    /// Owner; `None` for guest carts.
    pub profile_id: Option<ProfileId>,
    pub status: CartStatus,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line item.
///
/// Name and unit price are snapshots taken when the item was added, so later
/// catalog edits do not change what the customer sees in checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub image_url: Option<String>,
}

impl CartItem {
    /// `unit_price * quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

impl Cart {
    /// Sum of all line totals.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|item| i64::from(item.quantity)).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(cart_id: CartId, price: Decimal, quantity: i32) -> CartItem {
        CartItem {
            id: CartItemId::new(),
            cart_id,
            product_id: ProductId::new(),
            name: "Widget".to_string(),
            unit_price: price,
            quantity,
            image_url: None,
        }
    }

    #[test]
    fn test_subtotal_and_count() {
        let id = CartId::new();
        let cart = Cart {
            id,
            profile_id: None,
            status: CartStatus::Active,
            items: vec![
                item(id, Decimal::new(1250, 2), 2),
                item(id, Decimal::new(399, 2), 3),
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(cart.subtotal(), Decimal::new(3697, 2));
        assert_eq!(cart.item_count(), 5);
        assert!(!cart.is_empty());
    }
}
