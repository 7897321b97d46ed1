//! Admin console JSON API.
//!
//! Every handler takes [`RequireAdmin`](crate::middleware::RequireAdmin), so
//! a visitor without a session gets 401 and a signed-in non-admin gets 403.

pub mod hero_banners;
pub mod orders;
pub mod products;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

use crate::services::media::MAX_IMAGE_BYTES;
use crate::state::AppState;

/// Multipart overhead allowed on top of the image itself.
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(orders::list))
        .route("/orders/{id}", get(orders::show).post(orders::update))
        .route("/orders/{id}/capture", post(orders::capture))
        .route("/orders/{id}/cancel-payment", post(orders::cancel_payment))
        .route("/orders/{id}/refund", post(orders::refund))
        .route("/products", get(products::list).post(products::create))
        .route(
            "/products/{id}",
            get(products::show)
                .put(products::update)
                .delete(products::delete),
        )
        .route(
            "/products/{id}/images",
            post(products::upload_image)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + UPLOAD_OVERHEAD_BYTES)),
        )
        .route(
            "/products/{id}/images/{image_id}",
            delete(products::delete_image),
        )
        .route(
            "/hero-banners",
            get(hero_banners::list).post(hero_banners::create),
        )
        .route(
            "/hero-banners/{id}",
            put(hero_banners::update).delete(hero_banners::delete),
        )
}
