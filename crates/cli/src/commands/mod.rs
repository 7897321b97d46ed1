//! CLI subcommands.

pub mod migrate;
pub mod profile;
pub mod seed;

use meridian_core::{EmailError, InvalidStatus};
use meridian_storefront::config::{ConfigError, database_url_from_env};
use meridian_storefront::db::{self, RepositoryError};
use sqlx::PgPool;
use thiserror::Error;

/// Errors from any subcommand.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error(transparent)]
    InvalidRole(#[from] InvalidStatus),

    #[error("No profile with email {0}; the customer must sign up first")]
    ProfileNotFound(String),
}

/// Connect to the storefront database from the environment.
pub async fn connect() -> Result<PgPool, CommandError> {
    let database_url = database_url_from_env()?;
    tracing::info!("Connecting to storefront database...");
    Ok(db::create_pool(&database_url).await?)
}
