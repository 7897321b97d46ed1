//! Product repository: `products` and `product_images`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use meridian_core::{CurrencyCode, Price, ProductId, ProductImageId};

use super::{RepositoryError, conflict_on_unique, parse_column};
use crate::models::{NewProductImage, Product, ProductImage, ProductInput};

/// Storage for catalog products and their image metadata.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Products newest first, with images.
    async fn list(&self, active_only: bool) -> Result<Vec<Product>, RepositoryError>;

    /// Get a product by ID, with images.
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Get a product by slug, with images.
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError>;

    /// Insert a product. `currency` applies when the input does not name one.
    ///
    /// Returns `Conflict` if the slug is taken.
    async fn create(
        &self,
        input: &ProductInput,
        currency: CurrencyCode,
    ) -> Result<Product, RepositoryError>;

    /// Replace a product's fields. Returns `None` if the product does not exist.
    async fn update(
        &self,
        id: ProductId,
        input: &ProductInput,
        currency: CurrencyCode,
    ) -> Result<Option<Product>, RepositoryError>;

    /// Delete a product and its image rows. Returns `false` if it did not exist.
    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError>;

    /// Insert image metadata.
    async fn add_image(&self, image: &NewProductImage) -> Result<ProductImage, RepositoryError>;

    /// Delete an image row belonging to `product_id`, returning the deleted row.
    async fn delete_image(
        &self,
        product_id: ProductId,
        image_id: ProductImageId,
    ) -> Result<Option<ProductImage>, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    slug: String,
    name: String,
    description: Option<String>,
    price: Decimal,
    currency: String,
    inventory_quantity: i32,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ProductImageRow {
    id: ProductImageId,
    product_id: ProductId,
    storage_path: String,
    url: String,
    alt_text: Option<String>,
    position: i32,
    width: i32,
    height: i32,
    created_at: DateTime<Utc>,
}

impl From<ProductImageRow> for ProductImage {
    fn from(row: ProductImageRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            storage_path: row.storage_path,
            url: row.url,
            alt_text: row.alt_text,
            position: row.position,
            width: row.width,
            height: row.height,
            created_at: row.created_at,
        }
    }
}

impl ProductRow {
    fn into_product(self, images: Vec<ProductImage>) -> Result<Product, RepositoryError> {
        let currency: CurrencyCode = parse_column(&self.currency, "currency")?;
        Ok(Product {
            id: self.id,
            slug: self.slug,
            name: self.name,
            description: self.description,
            price: Price::new(self.price, currency),
            inventory_quantity: self.inventory_quantity,
            active: self.active,
            images,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const PRODUCT_COLUMNS: &str = r"
    id, slug, name, description, price, currency, inventory_quantity, active,
    created_at, updated_at
";
const IMAGE_COLUMNS: &str =
    "id, product_id, storage_path, url, alt_text, position, width, height, created_at";

/// `PostgreSQL` product repository.
#[derive(Clone)]
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    /// Create a new product repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load images for a batch of products, grouped by product.
    async fn load_images(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Vec<ProductImage>>, RepositoryError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();

        let rows = sqlx::query_as::<_, ProductImageRow>(&format!(
            r"
            SELECT {IMAGE_COLUMNS} FROM product_images
            WHERE product_id = ANY($1)
            ORDER BY position, created_at
            "
        ))
        .bind(uuids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<ProductId, Vec<ProductImage>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.product_id)
                .or_default()
                .push(ProductImage::from(row));
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<ProductRow>) -> Result<Vec<Product>, RepositoryError> {
        let ids: Vec<ProductId> = rows.iter().map(|r| r.id).collect();
        let mut images = self.load_images(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let product_images = images.remove(&row.id).unwrap_or_default();
                row.into_product(product_images)
            })
            .collect()
    }

    async fn hydrate_one(&self, row: Option<ProductRow>) -> Result<Option<Product>, RepositoryError> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn list(&self, active_only: bool) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            r"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE active OR NOT $1
            ORDER BY created_at DESC, id
            "
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate_one(row).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate_one(row).await
    }

    async fn create(
        &self,
        input: &ProductInput,
        currency: CurrencyCode,
    ) -> Result<Product, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r"
            INSERT INTO products (id, slug, name, description, price, currency, inventory_quantity, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PRODUCT_COLUMNS}
            "
        ))
        .bind(ProductId::new())
        .bind(&input.slug)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.price)
        .bind(input.currency.unwrap_or(currency).code())
        .bind(input.inventory_quantity)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "product slug"))?;

        row.into_product(Vec::new())
    }

    async fn update(
        &self,
        id: ProductId,
        input: &ProductInput,
        currency: CurrencyCode,
    ) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r"
            UPDATE products
            SET slug = $2, name = $3, description = $4, price = $5, currency = $6,
                inventory_quantity = $7, active = $8, updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(&input.slug)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.price)
        .bind(input.currency.unwrap_or(currency).code())
        .bind(input.inventory_quantity)
        .bind(input.active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "product slug"))?;

        self.hydrate_one(row).await
    }

    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_image(&self, image: &NewProductImage) -> Result<ProductImage, RepositoryError> {
        let row = sqlx::query_as::<_, ProductImageRow>(&format!(
            r"
            INSERT INTO product_images (id, product_id, storage_path, url, alt_text, position, width, height)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {IMAGE_COLUMNS}
            "
        ))
        .bind(ProductImageId::new())
        .bind(image.product_id)
        .bind(&image.storage_path)
        .bind(&image.url)
        .bind(&image.alt_text)
        .bind(image.position)
        .bind(image.width)
        .bind(image.height)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "image path"))?;

        Ok(row.into())
    }

    async fn delete_image(
        &self,
        product_id: ProductId,
        image_id: ProductImageId,
    ) -> Result<Option<ProductImage>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductImageRow>(&format!(
            "DELETE FROM product_images WHERE id = $2 AND product_id = $1 RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(product_id)
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProductImage::from))
    }
}
