//! Order domain types.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use meridian_core::{
    CartId, CheckoutSessionId, CurrencyCode, Email, OrderId, OrderItemId, OrderStatus,
    PaymentStatus, ProductId, ProfileId, ProviderKind,
};

use super::checkout::Address;

/// Default page size for admin order listings.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Upper bound on page size for admin order listings.
pub const MAX_PER_PAGE: u32 = 100;

/// A placed order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_provider: Option<ProviderKind>,
    pub payment_intent_id: Option<String>,
    pub payment_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub email: Option<Email>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_option_id: Option<String>,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub items: Vec<OrderItem>,
    pub profile_id: Option<ProfileId>,
    pub checkout_session_id: Option<CheckoutSessionId>,
    pub cart_id: Option<CartId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The vendor id to use for capture, cancel and refund.
    ///
    /// Prefers the payment id recorded at placement and falls back to the
    /// intent id (Stripe uses the PaymentIntent for both).
    #[must_use]
    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_id
            .as_deref()
            .or(self.payment_intent_id.as_deref())
    }
}

/// An order line item, copied from the cart at placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    /// `None` once the product has been deleted from the catalog.
    pub product_id: Option<ProductId>,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub total: Decimal,
}

/// Money breakdown of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// `subtotal + shipping + tax = total`, with tax charged on the subtotal
    /// and rounded half-away-from-zero to cents.
    #[must_use]
    pub fn compute(subtotal: Decimal, shipping: Decimal, tax_rate: Decimal) -> Self {
        let tax = (subtotal * tax_rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Self {
            subtotal,
            shipping,
            tax,
            total: subtotal + shipping + tax,
        }
    }
}

/// Filter and pagination for admin order listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl OrderFilter {
    /// Build a filter, clamping page to >= 1 and page size to `1..=MAX_PER_PAGE`.
    #[must_use]
    pub fn new(status: Option<OrderStatus>, page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            status,
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    #[must_use]
    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

/// One page of orders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}
