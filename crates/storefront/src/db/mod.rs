//! Database operations for the storefront `PostgreSQL` database.
//!
//! # Tables
//!
//! - `profiles` - User profiles and roles (populated by the sign-in flow)
//! - `products`, `product_images` - Catalog
//! - `hero_banners` - Homepage banners
//! - `carts`, `cart_items` - Shopping carts
//! - `checkout_sessions` - Checkout state per cart
//! - `orders`, `order_items` - Placed orders
//! - `tower_sessions.session` - Session storage (created by the session store)
//!
//! Each table group sits behind an `async_trait` repository trait with a
//! `PostgreSQL` implementation. The `test-support` feature adds an in-memory
//! implementation of every trait in [`memory`].
//!
//! Status columns are `TEXT`; values read back that fail the status guards
//! surface as [`RepositoryError::DataCorruption`].
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p meridian-cli -- migrate
//! ```

pub mod carts;
pub mod checkout_sessions;
pub mod hero_banners;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod orders;
pub mod products;
pub mod profiles;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use carts::{CartRepository, PgCartRepository};
pub use checkout_sessions::{CheckoutSessionRepository, PgCheckoutSessionRepository};
pub use hero_banners::{HeroBannerRepository, PgHeroBannerRepository};
pub use orders::{OrderRepository, PgOrderRepository};
pub use products::{PgProductRepository, ProductRepository};
pub use profiles::{PgProfileRepository, ProfileRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate slug).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map a unique violation to `Conflict`, everything else to `Database`.
pub(crate) fn conflict_on_unique(err: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(err)
}

/// Whether `err` is a violation of the named constraint or unique index.
pub(crate) fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

/// Parse a `TEXT` status column, reporting failures as data corruption.
pub(crate) fn parse_column<T>(value: &str, column: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} in database: {e}")))
}

/// Parse an optional `TEXT` column.
pub(crate) fn parse_optional_column<T>(
    value: Option<&str>,
    column: &str,
) -> Result<Option<T>, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map(|v| parse_column(v, column)).transpose()
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Every repository the application uses, as trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub carts: Arc<dyn CartRepository>,
    pub checkout_sessions: Arc<dyn CheckoutSessionRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub hero_banners: Arc<dyn HeroBannerRepository>,
}

impl Repositories {
    /// `PostgreSQL`-backed repositories sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            carts: Arc::new(PgCartRepository::new(pool.clone())),
            checkout_sessions: Arc::new(PgCheckoutSessionRepository::new(pool.clone())),
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
            profiles: Arc::new(PgProfileRepository::new(pool.clone())),
            products: Arc::new(PgProductRepository::new(pool.clone())),
            hero_banners: Arc::new(PgHeroBannerRepository::new(pool.clone())),
        }
    }

    /// In-memory repositories sharing one [`memory::InMemoryDatabase`].
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn in_memory(db: &memory::InMemoryDatabase) -> Self {
        let db = Arc::new(db.clone());
        Self {
            carts: db.clone(),
            checkout_sessions: db.clone(),
            orders: db.clone(),
            profiles: db.clone(),
            products: db.clone(),
            hero_banners: db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::CartStatus;

    #[test]
    fn test_parse_column_reports_corruption() {
        let ok: Result<CartStatus, _> = parse_column("checkout", "cart status");
        assert!(matches!(ok, Ok(CartStatus::Checkout)));

        let bad: Result<CartStatus, _> = parse_column("shipped", "cart status");
        match bad {
            Err(RepositoryError::DataCorruption(msg)) => {
                assert!(msg.contains("cart status"));
                assert!(msg.contains("shipped"));
            }
            other => panic!("expected DataCorruption, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_optional_column() {
        let none: Option<CartStatus> = parse_optional_column(None, "cart status").unwrap_or(None);
        assert!(none.is_none());
    }
}
