//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::Repositories;
use crate::payments::PaymentService;
use crate::services::{
    CartService, CatalogService, CheckoutService, HttpObjectStorage, MediaService, ObjectStorage,
    OrderService, ShippingService, StorageError, UnconfiguredStorage,
};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// repositories, payment registry, storage client and services.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    repos: Repositories,
    payments: PaymentService,
    catalog: CatalogService,
    carts: CartService,
    checkout: CheckoutService,
    orders: OrderService,
    shipping: ShippingService,
    media: MediaService,
}

impl AppState {
    /// Create the production state: `PostgreSQL` repositories, providers and
    /// storage from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage client cannot be built.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, StorageError> {
        let storage: Arc<dyn ObjectStorage> = match &config.storage {
            Some(storage) => Arc::new(HttpObjectStorage::new(storage)?),
            None => {
                tracing::warn!("Object storage not configured; image uploads are disabled");
                Arc::new(UnconfiguredStorage)
            }
        };
        let payments = PaymentService::from_config(&config.payments);
        if payments.is_empty() {
            tracing::warn!("No payment provider configured");
        }
        let repos = Repositories::postgres(&pool);

        Ok(Self::from_parts(config, Some(pool), repos, payments, storage))
    }

    /// Assemble state from already-built parts.
    #[must_use]
    pub fn from_parts(
        config: StorefrontConfig,
        pool: Option<PgPool>,
        repos: Repositories,
        payments: PaymentService,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let store = &config.store;
        let shipping = ShippingService::new(store.free_shipping_threshold);
        let catalog = CatalogService::new(
            repos.products.clone(),
            repos.hero_banners.clone(),
            store.currency,
        );
        let carts = CartService::new(repos.carts.clone(), repos.products.clone());
        let checkout = CheckoutService::new(
            repos.checkout_sessions.clone(),
            carts.clone(),
            shipping.clone(),
            store.tax_rate,
        );
        let orders = OrderService::new(
            repos.orders.clone(),
            carts.clone(),
            checkout.clone(),
            payments.clone(),
            store.currency,
        );
        let media = MediaService::new(repos.products.clone(), storage);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                repos,
                payments,
                catalog,
                carts,
                checkout,
                orders,
                shipping,
                media,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// The database pool; `None` when running on in-memory repositories.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn repos(&self) -> &Repositories {
        &self.inner.repos
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentService {
        &self.inner.payments
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogService {
        &self.inner.catalog
    }

    #[must_use]
    pub fn carts(&self) -> &CartService {
        &self.inner.carts
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn orders(&self) -> &OrderService {
        &self.inner.orders
    }

    #[must_use]
    pub fn shipping(&self) -> &ShippingService {
        &self.inner.shipping
    }

    #[must_use]
    pub fn media(&self) -> &MediaService {
        &self.inner.media
    }
}
