//! HTTP routes for the storefront API and admin console.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                              - Liveness
//! GET  /health/ready                        - Database ping
//!
//! # Catalog
//! GET  /api/products                        - Active products
//! GET  /api/products/{slug}                 - Product detail
//! GET  /api/hero-banners                    - Active hero banners
//!
//! # Cart (session-bound)
//! GET    /api/cart                          - Current cart, created on first use
//! DELETE /api/cart                          - Clear the cart
//! POST   /api/cart/items                    - Add a product
//! PATCH  /api/cart/items/{item_id}          - Change quantity (0 removes)
//! DELETE /api/cart/items/{item_id}          - Remove a line
//!
//! # Checkout
//! GET  /api/checkout/shipping-options       - Rates for the current cart
//! POST /api/checkout                        - Start checkout
//! GET  /api/checkout/{id}                   - Session with totals
//! POST /api/checkout/{id}/information       - Email and addresses
//! POST /api/checkout/{id}/shipping          - Choose a shipping option
//! POST /api/checkout/{id}/step              - Go back to a step
//! POST /api/checkout/place-order            - Verify payment, create the order
//!
//! # Payments
//! POST /api/payment/create-intent           - Vendor payment for a checkout
//! POST /api/payment/process                 - Charge a payment method
//! POST /api/payment/verify                  - Check a payment's status
//! GET  /api/payment/methods                 - Offered payment methods
//! GET  /api/payment/providers               - Configured providers (public keys)
//! POST /api/payment/webhook/{provider}      - Vendor notifications
//!
//! # Admin (admin role required)
//! GET  /admin/orders                        - Orders, filtered and paginated
//! GET  /admin/orders/{id}                   - Order detail
//! POST /admin/orders/{id}                   - Form actions (status updates)
//! POST /admin/orders/{id}/capture           - Capture the payment
//! POST /admin/orders/{id}/cancel-payment    - Void the payment
//! POST /admin/orders/{id}/refund            - Full or partial refund
//! GET/POST /admin/products                  - List, create
//! GET/PUT/DELETE /admin/products/{id}       - Read, update, delete
//! POST   /admin/products/{id}/images        - Upload an image (multipart)
//! DELETE /admin/products/{id}/images/{image_id}
//! GET/POST /admin/hero-banners              - List, create
//! PUT/DELETE /admin/hero-banners/{id}       - Update, delete
//! ```

pub mod admin;
pub mod api;

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::from_fn,
    routing::get,
};
use tower_http::trace::TraceLayer;
use tower_sessions::SessionStore;

use crate::middleware::{RequestId, request_id_middleware, session_layer};
use crate::state::AppState;

/// Assemble the application: routes, sessions, tracing and request ids.
///
/// Sentry layers are added by the binary around the result.
pub fn app<S>(state: AppState, session_store: S) -> Router
where
    S: SessionStore + Clone,
{
    let sessions = session_layer(session_store, state.config());

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api", api::router(&state))
        .nest("/admin", admin::router())
        .layer(sessions)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map_or("-", |id| id.0.as_str());
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        }))
        .layer(from_fn(request_id_middleware))
}

/// Liveness: the process is serving requests.
async fn health() -> &'static str {
    "ok"
}

/// Readiness: the database answers. Without a pool there is nothing to check.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    let Some(pool) = state.pool() else {
        return StatusCode::OK;
    };
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
