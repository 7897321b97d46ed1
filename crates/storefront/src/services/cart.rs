//! Cart operations.
//!
//! Carts are identified by the `cart_id` session key; signed-in customers also
//! own their carts through `profile_id`. Items can only change while the cart
//! is `active` or `checkout`.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use meridian_core::{CartId, CartItemId, CartStatus, InvalidStatus, ProductId, ProfileId};

use crate::db::carts::NewCartItem;
use crate::db::{CartRepository, ProductRepository, RepositoryError};
use crate::models::Cart;

/// Largest quantity of one product per cart.
pub const MAX_QUANTITY: i32 = 99;

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("Cart not found")]
    NotFound,

    #[error("Cart item not found")]
    ItemNotFound,

    #[error("Cart is {0} and can no longer be changed")]
    NotMutable(CartStatus),

    #[error("Cart has already been completed")]
    AlreadyCompleted,

    #[error("Quantity must be between 1 and {MAX_QUANTITY}, got {0}")]
    InvalidQuantity(i32),

    #[error("Product is not available")]
    ProductUnavailable,

    #[error("Only {available} left in stock")]
    InsufficientStock { available: i32 },

    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatus),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Cart service.
#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductRepository>,
}

impl CartService {
    #[must_use]
    pub fn new(carts: Arc<dyn CartRepository>, products: Arc<dyn ProductRepository>) -> Self {
        Self { carts, products }
    }

    /// Get a cart by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the cart does not exist.
    pub async fn get(&self, id: CartId) -> Result<Cart, CartError> {
        self.carts.get(id).await?.ok_or(CartError::NotFound)
    }

    async fn get_mutable(&self, id: CartId) -> Result<Cart, CartError> {
        let cart = self.get(id).await?;
        if !cart.status.is_mutable() {
            return Err(CartError::NotMutable(cart.status));
        }
        Ok(cart)
    }

    /// The cart the current visitor should see.
    ///
    /// Uses the session's cart while it is still mutable and belongs to the
    /// visitor. A guest cart seen by a signed-in customer is folded into their
    /// existing active cart (or adopted if they have none). Otherwise the
    /// customer's latest active cart is used, and failing that a new one is
    /// created.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    #[instrument(skip(self))]
    pub async fn get_or_create_active(
        &self,
        session_cart: Option<CartId>,
        profile_id: Option<ProfileId>,
    ) -> Result<Cart, CartError> {
        if let Some(id) = session_cart
            && let Some(cart) = self.carts.get(id).await?
            && cart.status.is_mutable()
        {
            match (cart.profile_id, profile_id) {
                (None, Some(owner)) => return self.merge_guest_cart(cart.id, owner).await,
                (Some(a), Some(b)) if a == b => return Ok(cart),
                (None, None) => return Ok(cart),
                _ => {}
            }
        }

        if let Some(owner) = profile_id
            && let Some(cart) = self.carts.find_active_for_profile(owner).await?
        {
            return Ok(cart);
        }

        let cart = self.carts.create(profile_id).await?;
        tracing::debug!(cart_id = %cart.id, "Created cart");
        Ok(cart)
    }

    /// Add `quantity` of a product, snapshotting its name, price and image.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity`, `NotMutable`, `ProductUnavailable` for
    /// missing or inactive products, or `InsufficientStock`.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Cart, CartError> {
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(CartError::InvalidQuantity(quantity));
        }
        let cart = self.get_mutable(cart_id).await?;
        let product = self
            .products
            .get(product_id)
            .await?
            .filter(|p| p.active)
            .ok_or(CartError::ProductUnavailable)?;

        let existing = cart
            .items
            .iter()
            .find(|item| item.product_id == product_id)
            .map_or(0, |item| item.quantity);
        let wanted = existing + quantity;
        if wanted > MAX_QUANTITY {
            return Err(CartError::InvalidQuantity(wanted));
        }
        if wanted > product.inventory_quantity {
            return Err(CartError::InsufficientStock {
                available: product.inventory_quantity.max(0),
            });
        }

        self.carts
            .add_item(NewCartItem {
                cart_id,
                product_id,
                image_url: product.featured_image_url().map(str::to_string),
                name: product.name,
                unit_price: product.price.amount,
                quantity,
            })
            .await?;
        self.get(cart_id).await
    }

    /// Set a line's quantity; `0` removes the line.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity`, `NotMutable` or `ItemNotFound`.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Cart, CartError> {
        if quantity == 0 {
            return self.remove_item(cart_id, item_id).await;
        }
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(CartError::InvalidQuantity(quantity));
        }
        self.get_mutable(cart_id).await?;
        self.carts
            .set_item_quantity(cart_id, item_id, quantity)
            .await?
            .ok_or(CartError::ItemNotFound)?;
        self.get(cart_id).await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `NotMutable` or `ItemNotFound`.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<Cart, CartError> {
        self.get_mutable(cart_id).await?;
        if !self.carts.remove_item(cart_id, item_id).await? {
            return Err(CartError::ItemNotFound);
        }
        self.get(cart_id).await
    }

    /// Remove every line and retire the cart as `cleared`.
    ///
    /// # Errors
    ///
    /// Returns `NotMutable` or the repository error.
    #[instrument(skip(self))]
    pub async fn clear(&self, cart_id: CartId) -> Result<(), CartError> {
        self.get_mutable(cart_id).await?;
        self.carts.clear_items(cart_id).await?;
        self.carts.set_status(cart_id, CartStatus::Cleared).await?;
        Ok(())
    }

    /// Fold a guest cart into the profile's active cart.
    ///
    /// If the profile has no active cart, the guest cart is adopted instead.
    /// Quantities are capped at [`MAX_QUANTITY`]. The guest cart ends `merged`.
    ///
    /// # Errors
    ///
    /// Returns `NotMutable` if the guest cart is no longer mutable.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(
        &self,
        guest_cart_id: CartId,
        profile_id: ProfileId,
    ) -> Result<Cart, CartError> {
        let guest = self.get_mutable(guest_cart_id).await?;

        let Some(target) = self.carts.find_active_for_profile(profile_id).await? else {
            self.carts.assign_profile(guest.id, profile_id).await?;
            return self.get(guest.id).await;
        };
        if target.id == guest.id {
            return Ok(target);
        }

        for item in guest.items {
            let existing = target
                .items
                .iter()
                .find(|line| line.product_id == item.product_id)
                .map_or(0, |line| line.quantity);
            let room = MAX_QUANTITY - existing;
            if room <= 0 {
                continue;
            }
            self.carts
                .add_item(NewCartItem {
                    cart_id: target.id,
                    product_id: item.product_id,
                    name: item.name,
                    unit_price: item.unit_price,
                    quantity: item.quantity.min(room),
                    image_url: item.image_url,
                })
                .await?;
        }
        self.carts
            .set_status(guest.id, CartStatus::Merged)
            .await?;
        tracing::info!(guest_cart = %guest.id, cart_id = %target.id, "Merged guest cart");

        self.get(target.id).await
    }

    /// Move a cart into `checkout`.
    ///
    /// # Errors
    ///
    /// Returns `NotMutable` if the cart is not `active`/`checkout`.
    pub async fn mark_checkout(&self, cart_id: CartId) -> Result<(), CartError> {
        let cart = self.get_mutable(cart_id).await?;
        if cart.status != CartStatus::Checkout {
            self.carts.set_status(cart_id, CartStatus::Checkout).await?;
        }
        Ok(())
    }

    /// Move a cart to `completed`, at most once.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyCompleted` if the cart was already completed, or
    /// `NotFound`.
    #[instrument(skip(self))]
    pub async fn complete(&self, cart_id: CartId) -> Result<(), CartError> {
        match self.carts.mark_completed(cart_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CartError::AlreadyCompleted),
            Err(RepositoryError::NotFound) => Err(CartError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a status given as a string, after checking it is a cart status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` for strings outside the set, or `NotFound`.
    pub async fn set_status(&self, cart_id: CartId, status: &str) -> Result<(), CartError> {
        let status: CartStatus = status.parse()?;
        match self.carts.set_status(cart_id, status).await {
            Err(RepositoryError::NotFound) => Err(CartError::NotFound),
            other => Ok(other?),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::memory::InMemoryDatabase;
    use crate::models::ProductInput;
    use meridian_core::CurrencyCode;

    struct Fixture {
        db: InMemoryDatabase,
        carts: CartService,
    }

    impl Fixture {
        fn new() -> Self {
            let db = InMemoryDatabase::new();
            let carts = CartService::new(Arc::new(db.clone()), Arc::new(db.clone()));
            Self { db, carts }
        }

        async fn product(&self, slug: &str, active: bool, stock: i32) -> ProductId {
            ProductRepository::create(
                &self.db,
                &ProductInput {
                    name: slug.to_string(),
                    slug: slug.to_string(),
                    description: None,
                    price: Decimal::new(1250, 2),
                    currency: None,
                    inventory_quantity: stock,
                    active,
                },
                CurrencyCode::USD,
            )
            .await
            .unwrap()
            .id
        }
    }

    #[tokio::test]
    async fn test_add_item_snapshots_and_accumulates() {
        let f = Fixture::new();
        let product = f.product("mug", true, 50).await;
        let cart = f.carts.get_or_create_active(None, None).await.unwrap();

        f.carts.add_item(cart.id, product, 2).await.unwrap();
        let cart = f.carts.add_item(cart.id, product, 3).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        let line = cart.items.first().unwrap();
        assert_eq!(line.quantity, 5);
        assert_eq!(line.name, "mug");
        assert_eq!(cart.subtotal(), Decimal::new(6250, 2));
    }

    #[tokio::test]
    async fn test_add_item_rejections() {
        let f = Fixture::new();
        let inactive = f.product("retired", false, 10).await;
        let scarce = f.product("scarce", true, 2).await;
        let cart = f.carts.get_or_create_active(None, None).await.unwrap();

        assert!(matches!(
            f.carts.add_item(cart.id, scarce, 0).await,
            Err(CartError::InvalidQuantity(0))
        ));
        assert!(matches!(
            f.carts.add_item(cart.id, inactive, 1).await,
            Err(CartError::ProductUnavailable)
        ));
        assert!(matches!(
            f.carts.add_item(cart.id, scarce, 3).await,
            Err(CartError::InsufficientStock { available: 2 })
        ));
    }

    #[tokio::test]
    async fn test_quantity_zero_removes_line() {
        let f = Fixture::new();
        let product = f.product("mug", true, 10).await;
        let cart = f.carts.get_or_create_active(None, None).await.unwrap();
        let cart = f.carts.add_item(cart.id, product, 1).await.unwrap();
        let item = cart.items.first().unwrap().id;

        let cart = f.carts.update_item_quantity(cart.id, item, 4).await.unwrap();
        assert_eq!(cart.items.first().unwrap().quantity, 4);

        let cart = f.carts.update_item_quantity(cart.id, item, 0).await.unwrap();
        assert!(cart.is_empty());
        assert!(matches!(
            f.carts.remove_item(cart.id, item).await,
            Err(CartError::ItemNotFound)
        ));
    }

    #[tokio::test]
    async fn test_complete_is_at_most_once() {
        let f = Fixture::new();
        let cart = f.carts.get_or_create_active(None, None).await.unwrap();

        f.carts.complete(cart.id).await.unwrap();
        assert!(matches!(
            f.carts.complete(cart.id).await,
            Err(CartError::AlreadyCompleted)
        ));

        let product = f.product("mug", true, 10).await;
        assert!(matches!(
            f.carts.add_item(cart.id, product, 1).await,
            Err(CartError::NotMutable(CartStatus::Completed))
        ));
    }

    #[tokio::test]
    async fn test_clear_retires_cart() {
        let f = Fixture::new();
        let product = f.product("mug", true, 10).await;
        let cart = f.carts.get_or_create_active(None, None).await.unwrap();
        f.carts.add_item(cart.id, product, 1).await.unwrap();

        f.carts.clear(cart.id).await.unwrap();
        let cleared = f.carts.get(cart.id).await.unwrap();
        assert_eq!(cleared.status, CartStatus::Cleared);
        assert!(cleared.is_empty());

        let fresh = f.carts.get_or_create_active(Some(cart.id), None).await.unwrap();
        assert_ne!(fresh.id, cart.id);
    }

    #[tokio::test]
    async fn test_guest_cart_merged_on_sign_in() {
        let f = Fixture::new();
        let mug = f.product("mug", true, 10).await;
        let tote = f.product("tote", true, 10).await;
        let owner = ProfileId::new();

        let own = f.carts.get_or_create_active(None, Some(owner)).await.unwrap();
        f.carts.add_item(own.id, mug, 1).await.unwrap();

        let guest = f.carts.get_or_create_active(None, None).await.unwrap();
        f.carts.add_item(guest.id, mug, 2).await.unwrap();
        f.carts.add_item(guest.id, tote, 1).await.unwrap();

        let merged = f
            .carts
            .get_or_create_active(Some(guest.id), Some(owner))
            .await
            .unwrap();

        assert_eq!(merged.id, own.id);
        assert_eq!(merged.item_count(), 4);
        assert_eq!(f.db.cart(guest.id).unwrap().status, CartStatus::Merged);
    }

    #[tokio::test]
    async fn test_guest_cart_adopted_without_existing_cart() {
        let f = Fixture::new();
        let owner = ProfileId::new();
        let guest = f.carts.get_or_create_active(None, None).await.unwrap();

        let cart = f
            .carts
            .get_or_create_active(Some(guest.id), Some(owner))
            .await
            .unwrap();
        assert_eq!(cart.id, guest.id);
        assert_eq!(cart.profile_id, Some(owner));
    }

    #[tokio::test]
    async fn test_set_status_is_guarded() {
        let f = Fixture::new();
        let cart = f.carts.get_or_create_active(None, None).await.unwrap();

        assert!(matches!(
            f.carts.set_status(cart.id, "archived").await,
            Err(CartError::InvalidStatus(_))
        ));
        f.carts.set_status(cart.id, "abandoned").await.unwrap();
        assert_eq!(f.carts.get(cart.id).await.unwrap().status, CartStatus::Abandoned);
        assert!(matches!(
            f.carts.set_status(CartId::new(), "abandoned").await,
            Err(CartError::NotFound)
        ));
    }
}
