//! Cart repository: `carts` and `cart_items`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use meridian_core::{CartId, CartItemId, CartStatus, ProductId, ProfileId};

use super::{RepositoryError, parse_column};
use crate::models::{Cart, CartItem};

/// A line to add to a cart. Adding a product already in the cart increases
/// its quantity and refreshes the name/price snapshot.
#[derive(Debug, Clone)]
pub struct NewCartItem {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub image_url: Option<String>,
}

/// Storage for carts and their line items.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Create an empty `active` cart.
    async fn create(&self, profile_id: Option<ProfileId>) -> Result<Cart, RepositoryError>;

    /// Get a cart with its items.
    async fn get(&self, id: CartId) -> Result<Option<Cart>, RepositoryError>;

    /// Most recently updated mutable (`active` or `checkout`) cart owned by a profile.
    async fn find_active_for_profile(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<Cart>, RepositoryError>;

    /// Attach a guest cart to a profile.
    async fn assign_profile(&self, id: CartId, profile_id: ProfileId)
    -> Result<(), RepositoryError>;

    /// Unconditional status write. Returns `NotFound` if the cart does not exist.
    async fn set_status(&self, id: CartId, status: CartStatus) -> Result<(), RepositoryError>;

    /// Move the cart to `completed` unless it already is.
    ///
    /// Returns `true` if this call performed the transition.
    async fn mark_completed(&self, id: CartId) -> Result<bool, RepositoryError>;

    /// Insert a line or add to the quantity of an existing line for the same product.
    async fn add_item(&self, item: NewCartItem) -> Result<CartItem, RepositoryError>;

    /// Set a line's quantity. Returns `None` if the line is not in the cart.
    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Option<CartItem>, RepositoryError>;

    /// Remove a line. Returns `false` if the line is not in the cart.
    async fn remove_item(&self, cart_id: CartId, item_id: CartItemId)
    -> Result<bool, RepositoryError>;

    /// Remove every line from the cart.
    async fn clear_items(&self, cart_id: CartId) -> Result<(), RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: CartId,
    profile_id: Option<ProfileId>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: CartItemId,
    cart_id: CartId,
    product_id: ProductId,
    name: String,
    unit_price: Decimal,
    quantity: i32,
    image_url: Option<String>,
}

impl From<CartItemRow> for CartItem {
    fn from(row: CartItemRow) -> Self {
        Self {
            id: row.id,
            cart_id: row.cart_id,
            product_id: row.product_id,
            name: row.name,
            unit_price: row.unit_price,
            quantity: row.quantity,
            image_url: row.image_url,
        }
    }
}

impl CartRow {
    fn into_cart(self, items: Vec<CartItemRow>) -> Result<Cart, RepositoryError> {
        Ok(Cart {
            id: self.id,
            profile_id: self.profile_id,
            status: parse_column(&self.status, "cart status")?,
            items: items.into_iter().map(CartItem::from).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const CART_COLUMNS: &str = "id, profile_id, status, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, cart_id, product_id, name, unit_price, quantity, image_url";

/// `PostgreSQL` cart repository.
#[derive(Clone)]
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, cart_id: CartId) -> Result<Vec<CartItemRow>, RepositoryError> {
        let rows = sqlx::query_as::<_, CartItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM cart_items WHERE cart_id = $1 ORDER BY created_at, id"
        ))
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn touch(&self, cart_id: CartId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
            .bind(cart_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn create(&self, profile_id: Option<ProfileId>) -> Result<Cart, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(&format!(
            "INSERT INTO carts (id, profile_id, status) VALUES ($1, $2, $3) RETURNING {CART_COLUMNS}"
        ))
        .bind(CartId::new())
        .bind(profile_id)
        .bind(CartStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.into_cart(Vec::new())
    }

    async fn get(&self, id: CartId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let items = self.load_items(row.id).await?;
                row.into_cart(items).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn find_active_for_profile(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(&format!(
            r"
            SELECT {CART_COLUMNS} FROM carts
            WHERE profile_id = $1 AND status IN ($2, $3)
            ORDER BY updated_at DESC
            LIMIT 1
            "
        ))
        .bind(profile_id)
        .bind(CartStatus::Active.as_str())
        .bind(CartStatus::Checkout.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let items = self.load_items(row.id).await?;
                row.into_cart(items).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn assign_profile(
        &self,
        id: CartId,
        profile_id: ProfileId,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE carts SET profile_id = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(profile_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_status(&self, id: CartId, status: CartStatus) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE carts SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_completed(&self, id: CartId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE carts SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status <> $2
            ",
        )
        .bind(id)
        .bind(CartStatus::Completed.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_item(&self, item: NewCartItem) -> Result<CartItem, RepositoryError> {
        let row = sqlx::query_as::<_, CartItemRow>(&format!(
            r"
            INSERT INTO cart_items (id, cart_id, product_id, name, unit_price, quantity, image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (cart_id, product_id) DO UPDATE
            SET quantity = cart_items.quantity + EXCLUDED.quantity,
                name = EXCLUDED.name,
                unit_price = EXCLUDED.unit_price,
                image_url = EXCLUDED.image_url
            RETURNING {ITEM_COLUMNS}
            "
        ))
        .bind(CartItemId::new())
        .bind(item.cart_id)
        .bind(item.product_id)
        .bind(&item.name)
        .bind(item.unit_price)
        .bind(item.quantity)
        .bind(&item.image_url)
        .fetch_one(&self.pool)
        .await?;

        self.touch(item.cart_id).await?;
        Ok(row.into())
    }

    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Option<CartItem>, RepositoryError> {
        let row = sqlx::query_as::<_, CartItemRow>(&format!(
            "UPDATE cart_items SET quantity = $3 WHERE id = $2 AND cart_id = $1 RETURNING {ITEM_COLUMNS}"
        ))
        .bind(cart_id)
        .bind(item_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            self.touch(cart_id).await?;
        }
        Ok(row.map(CartItem::from))
    }

    async fn remove_item(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $2 AND cart_id = $1")
            .bind(cart_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.touch(cart_id).await?;
        }
        Ok(removed)
    }

    async fn clear_items(&self, cart_id: CartId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&self.pool)
            .await?;
        self.touch(cart_id).await
    }
}
