//! Product catalog domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use meridian_core::{CurrencyCode, Price, ProductId, ProductImageId};

/// A catalog product with its images (ordered by position).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Price,
    pub inventory_quantity: i32,
    pub active: bool,
    pub images: Vec<ProductImage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// URL of the first image, if any.
    #[must_use]
    pub fn featured_image_url(&self) -> Option<&str> {
        self.images.first().map(|image| image.url.as_str())
    }
}

/// Product image metadata. The binary lives in object storage at `storage_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub id: ProductImageId,
    pub product_id: ProductId,
    pub storage_path: String,
    pub url: String,
    pub alt_text: Option<String>,
    pub position: i32,
    pub width: i32,
    pub height: i32,
    pub created_at: DateTime<Utc>,
}

/// Image metadata to insert after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProductImage {
    pub product_id: ProductId,
    pub storage_path: String,
    pub url: String,
    pub alt_text: Option<String>,
    pub position: i32,
    pub width: i32,
    pub height: i32,
}

/// Admin create/update payload for a product.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 120), custom(function = "validate_slug"))]
    pub slug: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(custom(function = "validate_price"))]
    pub price: Decimal,
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub inventory_quantity: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

/// Slugs are lowercase ASCII letters, digits and single hyphens.
fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let valid = !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("slug")
            .with_message("must be lowercase letters, digits and hyphens".into()))
    }
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("price").with_message("must not be negative".into()));
    }
    if price.normalize().scale() > 2 {
        return Err(
            ValidationError::new("price").with_message("at most two decimal places".into())
        );
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn input(slug: &str, price: Decimal) -> ProductInput {
        ProductInput {
            name: "Trail Mug".to_string(),
            slug: slug.to_string(),
            description: None,
            price,
            currency: None,
            inventory_quantity: 3,
            active: true,
        }
    }

    #[test]
    fn test_valid_input() {
        assert!(input("trail-mug-2", Decimal::new(1800, 2)).validate().is_ok());
    }

    #[test]
    fn test_slug_rules() {
        for bad in ["Trail-Mug", "trail mug", "-mug", "mug-", "trail--mug", ""] {
            let errors = input(bad, Decimal::ONE).validate().unwrap_err();
            assert!(errors.field_errors().contains_key("slug"), "{bad:?}");
        }
    }

    #[test]
    fn test_price_rules() {
        assert!(input("mug", Decimal::new(-1, 0)).validate().is_err());
        assert!(input("mug", Decimal::new(12_345, 3)).validate().is_err());
        assert!(input("mug", Decimal::new(12_340, 3)).validate().is_ok());
    }

    #[test]
    fn test_input_defaults() {
        let json = r#"{"name":"Mug","slug":"mug","price":"12.00"}"#;
        let input: ProductInput = serde_json::from_str(json).unwrap();
        assert!(input.active);
        assert_eq!(input.inventory_quantity, 0);
        assert!(input.currency.is_none());
    }
}
