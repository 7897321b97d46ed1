//! Order repository: `orders` and `order_items`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;

use meridian_core::{
    CartId, CheckoutSessionId, Email, OrderId, OrderItemId, OrderStatus, PaymentStatus, ProductId,
    ProfileId, ProviderKind,
};

use super::{
    RepositoryError, conflict_on_unique, parse_column, parse_optional_column, violates,
};
use crate::models::{Address, Order, OrderFilter, OrderItem, OrderPage};

/// Storage for orders and their line items.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert an order row and all of its line items.
    ///
    /// Returns `Conflict` if the order number is taken or the checkout
    /// session already has an order.
    async fn create(&self, order: &Order) -> Result<Order, RepositoryError>;

    /// Get an order with its items.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Orders newest first, optionally filtered by status.
    async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, RepositoryError>;

    /// Set the order status. Returns `None` if the order does not exist.
    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Set the payment status and, when given, the order status.
    /// Returns `None` if the order does not exist.
    async fn update_payment_status(
        &self,
        id: OrderId,
        payment_status: PaymentStatus,
        status: Option<OrderStatus>,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Find the order paid through `provider` whose intent id or payment id
    /// equals `reference`.
    async fn find_by_payment_reference(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    status: String,
    payment_status: String,
    payment_provider: Option<String>,
    payment_intent_id: Option<String>,
    payment_id: Option<String>,
    payment_method_id: Option<String>,
    email: Option<String>,
    shipping_address: Option<Json<Address>>,
    billing_address: Option<Json<Address>>,
    shipping_option_id: Option<String>,
    subtotal: Decimal,
    shipping: Decimal,
    tax: Decimal,
    total: Decimal,
    currency: String,
    profile_id: Option<ProfileId>,
    checkout_session_id: Option<CheckoutSessionId>,
    cart_id: Option<CartId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: OrderItemId,
    order_id: OrderId,
    product_id: Option<ProductId>,
    name: String,
    unit_price: Decimal,
    quantity: i32,
    total: Decimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            name: row.name,
            unit_price: row.unit_price,
            quantity: row.quantity,
            total: row.total,
        }
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItemRow>) -> Result<Order, RepositoryError> {
        let email = self
            .email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid email in database: {e}")))?;

        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            status: parse_column(&self.status, "order status")?,
            payment_status: parse_column(&self.payment_status, "payment status")?,
            payment_provider: parse_optional_column(
                self.payment_provider.as_deref(),
                "payment provider",
            )?,
            payment_intent_id: self.payment_intent_id,
            payment_id: self.payment_id,
            payment_method_id: self.payment_method_id,
            email,
            shipping_address: self.shipping_address.map(|Json(a)| a),
            billing_address: self.billing_address.map(|Json(a)| a),
            shipping_option_id: self.shipping_option_id,
            subtotal: self.subtotal,
            shipping: self.shipping,
            tax: self.tax,
            total: self.total,
            currency: parse_column(&self.currency, "currency")?,
            items: items.into_iter().map(OrderItem::from).collect(),
            profile_id: self.profile_id,
            checkout_session_id: self.checkout_session_id,
            cart_id: self.cart_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = r"
    id, order_number, status, payment_status, payment_provider, payment_intent_id,
    payment_id, payment_method_id, email, shipping_address, billing_address,
    shipping_option_id, subtotal, shipping, tax, total, currency, profile_id,
    checkout_session_id, cart_id, created_at, updated_at
";
/// Unique index allowing one order per checkout session.
const CHECKOUT_SESSION_INDEX: &str = "orders_checkout_session_idx";

const ITEM_COLUMNS: &str = "id, order_id, product_id, name, unit_price, quantity, total";

/// `PostgreSQL` order repository.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_items(&self, row: OrderRow) -> Result<Order, RepositoryError> {
        let items = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY name, id"
        ))
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;
        row.into_order(items)
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create(&self, order: &Order) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO orders (
                id, order_number, status, payment_status, payment_provider, payment_intent_id,
                payment_id, payment_method_id, email, shipping_address, billing_address,
                shipping_option_id, subtotal, shipping, tax, total, currency, profile_id,
                checkout_session_id, cart_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_provider.map(|p| p.as_str()))
        .bind(&order.payment_intent_id)
        .bind(&order.payment_id)
        .bind(&order.payment_method_id)
        .bind(order.email.as_ref().map(Email::as_str))
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(order.billing_address.as_ref().map(Json))
        .bind(&order.shipping_option_id)
        .bind(order.subtotal)
        .bind(order.shipping)
        .bind(order.tax)
        .bind(order.total)
        .bind(order.currency.code())
        .bind(order.profile_id)
        .bind(order.checkout_session_id)
        .bind(order.cart_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let what = if violates(&e, CHECKOUT_SESSION_INDEX) {
                "order for checkout session"
            } else {
                "order number"
            };
            conflict_on_unique(e, what)
        })?;

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let item_row = sqlx::query_as::<_, OrderItemRow>(&format!(
                r"
                INSERT INTO order_items (id, order_id, product_id, name, unit_price, quantity, total)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {ITEM_COLUMNS}
                "
            ))
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(item.unit_price)
            .bind(item.quantity)
            .bind(item.total)
            .fetch_one(&mut *tx)
            .await?;
            items.push(item_row);
        }

        tx.commit().await?;
        row.into_order(items)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.with_items(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, RepositoryError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE ($1::TEXT IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "
        ))
        .bind(status)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.with_items(row).await?);
        }

        Ok(OrderPage {
            orders,
            total,
            page: filter.page,
            per_page: filter.per_page,
        })
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.with_items(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn update_payment_status(
        &self,
        id: OrderId,
        payment_status: PaymentStatus,
        status: Option<OrderStatus>,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE orders
            SET payment_status = $2, status = COALESCE($3, status), updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(id)
        .bind(payment_status.as_str())
        .bind(status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.with_items(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_payment_reference(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE payment_provider = $1 AND (payment_intent_id = $2 OR payment_id = $2)
            ORDER BY created_at DESC
            LIMIT 1
            "
        ))
        .bind(provider.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.with_items(row).await.map(Some),
            None => Ok(None),
        }
    }
}
