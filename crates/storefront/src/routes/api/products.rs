//! Catalog read endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::models::{HeroBanner, Product};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/products", get(list))
        .route("/products/{slug}", get(show))
        .route("/hero-banners", get(hero_banners))
}

/// Active products, newest first.
#[instrument(skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    let products = state.catalog().active_products().await?;
    Ok(Json(products.as_ref().clone()))
}

/// A single active product with its images.
#[instrument(skip(state))]
pub async fn show(State(state): State<AppState>, Path(slug): Path<String>) -> Result<Json<Product>> {
    state
        .catalog()
        .product_by_slug(&slug)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Product '{slug}' not found")))
}

#[instrument(skip(state))]
pub async fn hero_banners(State(state): State<AppState>) -> Result<Json<Vec<HeroBanner>>> {
    let banners = state.catalog().active_banners().await?;
    Ok(Json(banners.as_ref().clone()))
}
