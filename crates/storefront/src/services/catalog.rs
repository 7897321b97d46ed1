//! Cached storefront reads of products and hero banners.
//!
//! Caches for 5 minutes. Admin writes go through this service so the cache
//! can be invalidated as soon as the catalog changes.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};

use meridian_core::{CurrencyCode, HeroBannerId, ProductId};

use crate::db::{HeroBannerRepository, ProductRepository, RepositoryError};
use crate::models::{HeroBanner, HeroBannerInput, Product, ProductInput};

/// Cache key for catalog reads.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    ActiveProducts,
    Product(String),
    ActiveBanners,
}

/// Cached value types.
#[derive(Debug, Clone)]
enum CacheValue {
    Products(Arc<Vec<Product>>),
    Product(Box<Product>),
    Banners(Arc<Vec<HeroBanner>>),
}

/// Catalog reads for the storefront and writes for the admin console.
#[derive(Clone)]
pub struct CatalogService {
    products: Arc<dyn ProductRepository>,
    banners: Arc<dyn HeroBannerRepository>,
    currency: CurrencyCode,
    cache: Cache<CacheKey, CacheValue>,
}

impl CatalogService {
    /// Create a catalog service. `currency` is used for products that do not
    /// name their own.
    #[must_use]
    pub fn new(
        products: Arc<dyn ProductRepository>,
        banners: Arc<dyn HeroBannerRepository>,
        currency: CurrencyCode,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Self {
            products,
            banners,
            currency,
            cache,
        }
    }

    /// Drop every cached read.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    // =========================================================================
    // Storefront reads
    // =========================================================================

    /// Active products, newest first.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    #[instrument(skip(self))]
    pub async fn active_products(&self) -> Result<Arc<Vec<Product>>, RepositoryError> {
        if let Some(CacheValue::Products(products)) =
            self.cache.get(&CacheKey::ActiveProducts).await
        {
            debug!("Cache hit for active products");
            return Ok(products);
        }

        let products = Arc::new(self.products.list(true).await?);
        self.cache
            .insert(CacheKey::ActiveProducts, CacheValue::Products(products.clone()))
            .await;
        Ok(products)
    }

    /// An active product by slug, with images.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    #[instrument(skip(self), fields(slug = %slug))]
    pub async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError> {
        let key = CacheKey::Product(slug.to_string());
        if let Some(CacheValue::Product(product)) = self.cache.get(&key).await {
            debug!("Cache hit for product");
            return Ok(Some(*product));
        }

        let Some(product) = self
            .products
            .get_by_slug(slug)
            .await?
            .filter(|p| p.active)
        else {
            return Ok(None);
        };
        self.cache
            .insert(key, CacheValue::Product(Box::new(product.clone())))
            .await;
        Ok(Some(product))
    }

    /// Active hero banners ordered by position.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    #[instrument(skip(self))]
    pub async fn active_banners(&self) -> Result<Arc<Vec<HeroBanner>>, RepositoryError> {
        if let Some(CacheValue::Banners(banners)) = self.cache.get(&CacheKey::ActiveBanners).await {
            debug!("Cache hit for hero banners");
            return Ok(banners);
        }

        let banners = Arc::new(self.banners.list(true).await?);
        self.cache
            .insert(CacheKey::ActiveBanners, CacheValue::Banners(banners.clone()))
            .await;
        Ok(banners)
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// Every product, active or not. Not cached.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    pub async fn all_products(&self) -> Result<Vec<Product>, RepositoryError> {
        self.products.list(false).await
    }

    /// A product by id, active or not. Not cached.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    pub async fn product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        self.products.get(id).await
    }

    /// # Errors
    ///
    /// Returns `Conflict` if the slug is taken.
    #[instrument(skip(self, input), fields(slug = %input.slug))]
    pub async fn create_product(&self, input: &ProductInput) -> Result<Product, RepositoryError> {
        let product = self.products.create(input, self.currency).await?;
        self.invalidate();
        Ok(product)
    }

    /// # Errors
    ///
    /// Returns `Conflict` if the new slug is taken.
    #[instrument(skip(self, input), fields(slug = %input.slug))]
    pub async fn update_product(
        &self,
        id: ProductId,
        input: &ProductInput,
    ) -> Result<Option<Product>, RepositoryError> {
        let product = self.products.update(id, input, self.currency).await?;
        self.invalidate();
        Ok(product)
    }

    /// Returns `false` if the product did not exist.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let deleted = self.products.delete(id).await?;
        self.invalidate();
        Ok(deleted)
    }

    /// Every banner, active or not. Not cached.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    pub async fn all_banners(&self) -> Result<Vec<HeroBanner>, RepositoryError> {
        self.banners.list(false).await
    }

    /// # Errors
    ///
    /// Returns the repository error.
    pub async fn create_banner(&self, input: &HeroBannerInput) -> Result<HeroBanner, RepositoryError> {
        let banner = self.banners.create(input).await?;
        self.invalidate();
        Ok(banner)
    }

    /// # Errors
    ///
    /// Returns the repository error.
    pub async fn update_banner(
        &self,
        id: HeroBannerId,
        input: &HeroBannerInput,
    ) -> Result<Option<HeroBanner>, RepositoryError> {
        let banner = self.banners.update(id, input).await?;
        self.invalidate();
        Ok(banner)
    }

    /// # Errors
    ///
    /// Returns the repository error.
    pub async fn delete_banner(&self, id: HeroBannerId) -> Result<bool, RepositoryError> {
        let deleted = self.banners.delete(id).await?;
        self.invalidate();
        Ok(deleted)
    }
}
