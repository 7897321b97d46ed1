//! Sample catalog data for development databases.
//!
//! Safe to run repeatedly: products are skipped when their slug exists and
//! the banner when one with the same title exists.

use rust_decimal::Decimal;

use meridian_storefront::config::StoreConfig;
use meridian_storefront::db::{
    HeroBannerRepository, PgHeroBannerRepository, PgProductRepository, ProductRepository,
    RepositoryError,
};
use meridian_storefront::models::{HeroBannerInput, ProductInput};

use super::{CommandError, connect};

/// `(slug, name, description, price in cents, inventory)`
const PRODUCTS: &[(&str, &str, &str, i64, i32)] = &[
    (
        "trail-mug",
        "Trail Mug",
        "Enamel camp mug, 12 oz.",
        1800,
        40,
    ),
    (
        "canvas-tote",
        "Canvas Tote",
        "Heavyweight cotton canvas with an inside pocket.",
        3200,
        25,
    ),
    (
        "wool-beanie",
        "Wool Beanie",
        "Merino rib knit, one size.",
        2800,
        60,
    ),
];

const BANNER_TITLE: &str = "New season, new gear";

/// Insert the sample products and hero banner.
///
/// # Errors
///
/// Returns an error if configuration is invalid or a database write fails
/// for any reason other than the row already existing.
pub async fn run() -> Result<(), CommandError> {
    let store = StoreConfig::from_env()?;
    let pool = connect().await?;
    let products = PgProductRepository::new(pool.clone());
    let banners = PgHeroBannerRepository::new(pool);

    let mut inserted = 0;
    for &(slug, name, description, cents, inventory) in PRODUCTS {
        let input = ProductInput {
            name: name.to_string(),
            slug: slug.to_string(),
            description: Some(description.to_string()),
            price: Decimal::new(cents, 2),
            currency: None,
            inventory_quantity: inventory,
            active: true,
        };
        match products.create(&input, store.currency).await {
            Ok(product) => {
                tracing::info!(product_id = %product.id, slug, "Product created");
                inserted += 1;
            }
            Err(RepositoryError::Conflict(_)) => tracing::info!(slug, "Product exists, skipped"),
            Err(e) => return Err(e.into()),
        }
    }

    let existing = banners.list(false).await?;
    if existing.iter().any(|b| b.title == BANNER_TITLE) {
        tracing::info!("Hero banner exists, skipped");
    } else {
        let banner = banners
            .create(&HeroBannerInput {
                title: BANNER_TITLE.to_string(),
                subtitle: Some("Free standard shipping on orders over $75".to_string()),
                image_url: "https://images.example.com/banners/new-season.jpg".to_string(),
                link_url: Some("/products".to_string()),
                cta_label: Some("Shop now".to_string()),
                position: 0,
                active: true,
            })
            .await?;
        tracing::info!(banner_id = %banner.id, "Hero banner created");
    }

    tracing::info!(products = inserted, "Seeding complete!");
    Ok(())
}
