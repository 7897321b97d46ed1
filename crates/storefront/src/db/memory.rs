//! In-memory implementations of every repository trait.
//!
//! Used by unit tests and, through the `test-support` feature, by the
//! integration tests. One [`InMemoryDatabase`] holds every table; clones share
//! state. Individual writes can be made to fail once via [`FailPoint`] to
//! exercise partial-failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use meridian_core::{
    CartId, CartItemId, CartStatus, CheckoutSessionId, CurrencyCode, Email, HeroBannerId, OrderId,
    OrderStatus, PaymentStatus, Price, ProductId, ProductImageId, ProfileId, ProviderKind,
    UserRole,
};

use super::carts::{CartRepository, NewCartItem};
use super::checkout_sessions::CheckoutSessionRepository;
use super::hero_banners::HeroBannerRepository;
use super::orders::OrderRepository;
use super::products::ProductRepository;
use super::profiles::ProfileRepository;
use super::RepositoryError;
use crate::models::{
    Cart, CartItem, CheckoutSession, HeroBanner, HeroBannerInput, NewProductImage, Order,
    OrderFilter, OrderPage, Product, ProductImage, ProductInput, Profile,
};

/// A write that can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ImageInsert,
    OrderInsert,
    CartCompletion,
    CheckoutUpdate,
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<ProfileId, Profile>,
    products: HashMap<ProductId, Product>,
    images: HashMap<ProductImageId, ProductImage>,
    banners: HashMap<HeroBannerId, HeroBanner>,
    carts: HashMap<CartId, Cart>,
    sessions: HashMap<CheckoutSessionId, CheckoutSession>,
    orders: HashMap<OrderId, Order>,
    failures: HashSet<FailPoint>,
}

impl Tables {
    fn take_failure(&mut self, point: FailPoint) -> Result<(), RepositoryError> {
        if self.failures.remove(&point) {
            return Err(RepositoryError::Database(sqlx::Error::Protocol(format!(
                "injected failure: {point:?}"
            ))));
        }
        Ok(())
    }

    fn product_with_images(&self, product: &Product) -> Product {
        let mut images: Vec<ProductImage> = self
            .images
            .values()
            .filter(|image| image.product_id == product.id)
            .cloned()
            .collect();
        images.sort_by_key(|image| (image.position, image.created_at));
        Product {
            images,
            ..product.clone()
        }
    }

    fn slug_taken(&self, slug: &str, except: Option<ProductId>) -> bool {
        self.products
            .values()
            .any(|p| p.slug == slug && Some(p.id) != except)
    }
}

/// Every table in memory behind one mutex.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    inner: Arc<Mutex<Tables>>,
}

impl InMemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next write at `point` fail with a database error.
    pub fn fail_once(&self, point: FailPoint) {
        self.tables().failures.insert(point);
    }

    /// Insert a profile as the sign-in flow would.
    pub fn insert_profile(&self, email: Email, role: UserRole) -> Profile {
        let profile = Profile {
            id: ProfileId::new(),
            email,
            full_name: None,
            role,
            created_at: Utc::now(),
        };
        self.tables().profiles.insert(profile.id, profile.clone());
        profile
    }

    /// Snapshot of every order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.tables().orders.values().cloned().collect()
    }

    /// Snapshot of one cart.
    #[must_use]
    pub fn cart(&self, id: CartId) -> Option<Cart> {
        self.tables().carts.get(&id).cloned()
    }

    /// Snapshot of every image row.
    #[must_use]
    pub fn images(&self) -> Vec<ProductImage> {
        self.tables().images.values().cloned().collect()
    }
}

#[async_trait]
impl CartRepository for InMemoryDatabase {
    async fn create(&self, profile_id: Option<ProfileId>) -> Result<Cart, RepositoryError> {
        let now = Utc::now();
        let cart = Cart {
            id: CartId::new(),
            profile_id,
            status: CartStatus::Active,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.tables().carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn get(&self, id: CartId) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.tables().carts.get(&id).cloned())
    }

    async fn find_active_for_profile(
        &self,
        profile_id: ProfileId,
    ) -> Result<Option<Cart>, RepositoryError> {
        Ok(self
            .tables()
            .carts
            .values()
            .filter(|c| c.profile_id == Some(profile_id) && c.status.is_mutable())
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn assign_profile(
        &self,
        id: CartId,
        profile_id: ProfileId,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        let cart = tables.carts.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        cart.profile_id = Some(profile_id);
        cart.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, id: CartId, status: CartStatus) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        let cart = tables.carts.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        cart.status = status;
        cart.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_completed(&self, id: CartId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables();
        tables.take_failure(FailPoint::CartCompletion)?;
        match tables.carts.get_mut(&id) {
            Some(cart) if cart.status != CartStatus::Completed => {
                cart.status = CartStatus::Completed;
                cart.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_item(&self, item: NewCartItem) -> Result<CartItem, RepositoryError> {
        let mut tables = self.tables();
        let cart = tables
            .carts
            .get_mut(&item.cart_id)
            .ok_or(RepositoryError::NotFound)?;
        cart.updated_at = Utc::now();

        if let Some(existing) = cart
            .items
            .iter_mut()
            .find(|line| line.product_id == item.product_id)
        {
            existing.quantity += item.quantity;
            existing.name = item.name;
            existing.unit_price = item.unit_price;
            existing.image_url = item.image_url;
            return Ok(existing.clone());
        }

        let line = CartItem {
            id: CartItemId::new(),
            cart_id: item.cart_id,
            product_id: item.product_id,
            name: item.name,
            unit_price: item.unit_price,
            quantity: item.quantity,
            image_url: item.image_url,
        };
        cart.items.push(line.clone());
        Ok(line)
    }

    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Option<CartItem>, RepositoryError> {
        let mut tables = self.tables();
        let Some(cart) = tables.carts.get_mut(&cart_id) else {
            return Ok(None);
        };
        let Some(line) = cart.items.iter_mut().find(|line| line.id == item_id) else {
            return Ok(None);
        };
        line.quantity = quantity;
        let line = line.clone();
        cart.updated_at = Utc::now();
        Ok(Some(line))
    }

    async fn remove_item(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables();
        let Some(cart) = tables.carts.get_mut(&cart_id) else {
            return Ok(false);
        };
        let before = cart.items.len();
        cart.items.retain(|line| line.id != item_id);
        Ok(cart.items.len() < before)
    }

    async fn clear_items(&self, cart_id: CartId) -> Result<(), RepositoryError> {
        if let Some(cart) = self.tables().carts.get_mut(&cart_id) {
            cart.items.clear();
            cart.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl CheckoutSessionRepository for InMemoryDatabase {
    async fn create(&self, session: &CheckoutSession) -> Result<CheckoutSession, RepositoryError> {
        self.tables().sessions.insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn get(&self, id: CheckoutSessionId) -> Result<Option<CheckoutSession>, RepositoryError> {
        Ok(self.tables().sessions.get(&id).cloned())
    }

    async fn update(&self, session: &CheckoutSession) -> Result<CheckoutSession, RepositoryError> {
        let mut tables = self.tables();
        tables.take_failure(FailPoint::CheckoutUpdate)?;
        match tables.sessions.get_mut(&session.id) {
            Some(stored) if !stored.is_confirmed() => {
                *stored = CheckoutSession {
                    updated_at: Utc::now(),
                    ..session.clone()
                };
                Ok(stored.clone())
            }
            _ => Err(RepositoryError::Conflict(
                "checkout session is missing or already confirmed".to_string(),
            )),
        }
    }
}

#[async_trait]
impl OrderRepository for InMemoryDatabase {
    async fn create(&self, order: &Order) -> Result<Order, RepositoryError> {
        let mut tables = self.tables();
        tables.take_failure(FailPoint::OrderInsert)?;
        if tables
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(RepositoryError::Conflict(
                "order number already exists".to_string(),
            ));
        }
        if let Some(session_id) = order.checkout_session_id
            && tables
                .orders
                .values()
                .any(|o| o.checkout_session_id == Some(session_id))
        {
            return Err(RepositoryError::Conflict(
                "order for checkout session already exists".to_string(),
            ));
        }
        tables.orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables().orders.get(&id).cloned())
    }

    async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, RepositoryError> {
        let mut orders: Vec<Order> = self
            .tables()
            .orders
            .values()
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = i64::try_from(orders.len()).unwrap_or(i64::MAX);
        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.limit()).unwrap_or(usize::MAX);
        let orders = orders.into_iter().skip(offset).take(limit).collect();

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
        let mut tables = self.tables();
        Ok(tables.orders.get_mut(&id).map(|order| {
            order.status = status;
            order.updated_at = Utc::now();
            order.clone()
        }))
    }

    async fn update_payment_status(
        &self,
        id: OrderId,
        payment_status: PaymentStatus,
        status: Option<OrderStatus>,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tables = self.tables();
        Ok(tables.orders.get_mut(&id).map(|order| {
            order.payment_status = payment_status;
            if let Some(status) = status {
                order.status = status;
            }
            order.updated_at = Utc::now();
            order.clone()
        }))
    }

    async fn find_by_payment_reference(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .tables()
            .orders
            .values()
            .filter(|o| o.payment_provider == Some(provider))
            .find(|o| {
                o.payment_intent_id.as_deref() == Some(reference)
                    || o.payment_id.as_deref() == Some(reference)
            })
            .cloned())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryDatabase {
    async fn get(&self, id: ProfileId) -> Result<Option<Profile>, RepositoryError> {
        Ok(self.tables().profiles.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<Profile>, RepositoryError> {
        Ok(self
            .tables()
            .profiles
            .values()
            .find(|p| &p.email == email)
            .cloned())
    }

    async fn set_role(&self, email: &Email, role: UserRole) -> Result<Profile, RepositoryError> {
        let mut tables = self.tables();
        let profile = tables
            .profiles
            .values_mut()
            .find(|p| &p.email == email)
            .ok_or(RepositoryError::NotFound)?;
        profile.role = role;
        Ok(profile.clone())
    }
}

#[async_trait]
impl ProductRepository for InMemoryDatabase {
    async fn list(&self, active_only: bool) -> Result<Vec<Product>, RepositoryError> {
        let tables = self.tables();
        let mut products: Vec<Product> = tables
            .products
            .values()
            .filter(|p| p.active || !active_only)
            .map(|p| tables.product_with_images(p))
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let tables = self.tables();
        Ok(tables
            .products
            .get(&id)
            .map(|p| tables.product_with_images(p)))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError> {
        let tables = self.tables();
        Ok(tables
            .products
            .values()
            .find(|p| p.slug == slug)
            .map(|p| tables.product_with_images(p)))
    }

    async fn create(
        &self,
        input: &ProductInput,
        currency: CurrencyCode,
    ) -> Result<Product, RepositoryError> {
        let mut tables = self.tables();
        if tables.slug_taken(&input.slug, None) {
            return Err(RepositoryError::Conflict(
                "product slug already exists".to_string(),
            ));
        }
        let now = Utc::now();
        let product = Product {
            id: ProductId::new(),
            slug: input.slug.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            price: Price::new(input.price, input.currency.unwrap_or(currency)),
            inventory_quantity: input.inventory_quantity,
            active: input.active,
            images: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        tables.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update(
        &self,
        id: ProductId,
        input: &ProductInput,
        currency: CurrencyCode,
    ) -> Result<Option<Product>, RepositoryError> {
        let mut tables = self.tables();
        if tables.slug_taken(&input.slug, Some(id)) {
            return Err(RepositoryError::Conflict(
                "product slug already exists".to_string(),
            ));
        }
        let Some(product) = tables.products.get_mut(&id) else {
            return Ok(None);
        };
        product.slug.clone_from(&input.slug);
        product.name.clone_from(&input.name);
        product.description.clone_from(&input.description);
        product.price = Price::new(input.price, input.currency.unwrap_or(currency));
        product.inventory_quantity = input.inventory_quantity;
        product.active = input.active;
        product.updated_at = Utc::now();
        let product = product.clone();
        Ok(Some(tables.product_with_images(&product)))
    }

    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables();
        let existed = tables.products.remove(&id).is_some();
        tables.images.retain(|_, image| image.product_id != id);
        Ok(existed)
    }

    async fn add_image(&self, image: &NewProductImage) -> Result<ProductImage, RepositoryError> {
        let mut tables = self.tables();
        tables.take_failure(FailPoint::ImageInsert)?;
        if !tables.products.contains_key(&image.product_id) {
            return Err(RepositoryError::NotFound);
        }
        let row = ProductImage {
            id: ProductImageId::new(),
            product_id: image.product_id,
            storage_path: image.storage_path.clone(),
            url: image.url.clone(),
            alt_text: image.alt_text.clone(),
            position: image.position,
            width: image.width,
            height: image.height,
            created_at: Utc::now(),
        };
        tables.images.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete_image(
        &self,
        product_id: ProductId,
        image_id: ProductImageId,
    ) -> Result<Option<ProductImage>, RepositoryError> {
        let mut tables = self.tables();
        let belongs = tables
            .images
            .get(&image_id)
            .is_some_and(|image| image.product_id == product_id);
        if belongs {
            Ok(tables.images.remove(&image_id))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl HeroBannerRepository for InMemoryDatabase {
    async fn list(&self, active_only: bool) -> Result<Vec<HeroBanner>, RepositoryError> {
        let mut banners: Vec<HeroBanner> = self
            .tables()
            .banners
            .values()
            .filter(|b| b.active || !active_only)
            .cloned()
            .collect();
        banners.sort_by_key(|b| (b.position, b.created_at));
        Ok(banners)
    }

    async fn create(&self, input: &HeroBannerInput) -> Result<HeroBanner, RepositoryError> {
        let now = Utc::now();
        let banner = HeroBanner {
            id: HeroBannerId::new(),
            title: input.title.clone(),
            subtitle: input.subtitle.clone(),
            image_url: input.image_url.clone(),
            link_url: input.link_url.clone(),
            cta_label: input.cta_label.clone(),
            position: input.position,
            active: input.active,
            created_at: now,
            updated_at: now,
        };
        self.tables().banners.insert(banner.id, banner.clone());
        Ok(banner)
    }

    async fn update(
        &self,
        id: HeroBannerId,
        input: &HeroBannerInput,
    ) -> Result<Option<HeroBanner>, RepositoryError> {
        let mut tables = self.tables();
        Ok(tables.banners.get_mut(&id).map(|banner| {
            banner.title.clone_from(&input.title);
            banner.subtitle.clone_from(&input.subtitle);
            banner.image_url.clone_from(&input.image_url);
            banner.link_url.clone_from(&input.link_url);
            banner.cta_label.clone_from(&input.cta_label);
            banner.position = input.position;
            banner.active = input.active;
            banner.updated_at = Utc::now();
            banner.clone()
        }))
    }

    async fn delete(&self, id: HeroBannerId) -> Result<bool, RepositoryError> {
        Ok(self.tables().banners.remove(&id).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    #[tokio::test]
    async fn test_mark_completed_is_at_most_once() {
        let db = InMemoryDatabase::new();
        let cart = CartRepository::create(&db, None).await.unwrap();

        assert!(db.mark_completed(cart.id).await.unwrap());
        assert!(!db.mark_completed(cart.id).await.unwrap());
        assert_eq!(db.cart(cart.id).unwrap().status, CartStatus::Completed);
    }

    #[tokio::test]
    async fn test_add_item_merges_same_product() {
        let db = InMemoryDatabase::new();
        let cart = CartRepository::create(&db, None).await.unwrap();
        let product_id = ProductId::new();
        let line = |quantity| NewCartItem {
            cart_id: cart.id,
            product_id,
            name: "Mug".to_string(),
            unit_price: Decimal::new(1200, 2),
            quantity,
            image_url: None,
        };

        db.add_item(line(1)).await.unwrap();
        let merged = db.add_item(line(2)).await.unwrap();

        assert_eq!(merged.quantity, 3);
        assert_eq!(db.cart(cart.id).unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_once_only_fails_once() {
        let db = InMemoryDatabase::new();
        let cart = CartRepository::create(&db, None).await.unwrap();
        db.fail_once(FailPoint::CartCompletion);

        assert!(db.mark_completed(cart.id).await.is_err());
        assert!(db.mark_completed(cart.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_confirmed_session_is_not_rewritten() {
        let db = InMemoryDatabase::new();
        let mut session = CheckoutSession::new(CartId::new(), None, None);
        CheckoutSessionRepository::create(&db, &session).await.unwrap();

        session.step = meridian_core::CheckoutStep::Confirmation;
        CheckoutSessionRepository::update(&db, &session).await.unwrap();

        session.shipping_option_id = Some("express".to_string());
        let result = CheckoutSessionRepository::update(&db, &session).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    fn order_for(session_id: CheckoutSessionId, number: &str) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            order_number: number.to_string(),
            status: OrderStatus::Paid,
            payment_status: PaymentStatus::Paid,
            payment_provider: Some(ProviderKind::Square),
            payment_intent_id: Some("ORD1".to_string()),
            payment_id: None,
            payment_method_id: None,
            email: None,
            shipping_address: None,
            billing_address: None,
            shipping_option_id: None,
            subtotal: Decimal::new(1000, 2),
            shipping: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::new(1000, 2),
            currency: CurrencyCode::USD,
            items: Vec::new(),
            profile_id: None,
            checkout_session_id: Some(session_id),
            cart_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_one_order_per_checkout_session() {
        let db = InMemoryDatabase::new();
        let session_id = CheckoutSessionId::new();

        OrderRepository::create(&db, &order_for(session_id, "ORD-A"))
            .await
            .unwrap();
        let result = OrderRepository::create(&db, &order_for(session_id, "ORD-B")).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        assert_eq!(db.orders().len(), 1);

        OrderRepository::create(&db, &order_for(CheckoutSessionId::new(), "ORD-C"))
            .await
            .unwrap();
        assert_eq!(db.orders().len(), 2);
    }
}
