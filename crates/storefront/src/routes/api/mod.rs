//! Storefront JSON API.
//!
//! The visitor's cart is found through the `cart_id` session key (and the
//! signed-in profile, when there is one). Checkout sessions are only visible
//! to the visitor whose cart they were started from.

pub mod cart;
pub mod checkout;
pub mod payment;
pub mod products;

use axum::Router;
use tower_sessions::Session;

use meridian_core::CheckoutSessionId;

use crate::error::{AppError, Result};
use crate::middleware::{
    checkout_rate_limiter, payment_rate_limiter, session_cart_id, set_session_cart_id,
};
use crate::models::{Cart, CheckoutSession, CurrentUser};
use crate::services::CheckoutError;
use crate::state::AppState;

/// Build the `/api` router. Checkout and payment routes are rate limited
/// when `rate_limit_enabled` is set; vendor webhooks never are.
pub fn router(state: &AppState) -> Router<AppState> {
    let rate_limited = state.config().rate_limit_enabled;

    let mut checkout = checkout::router();
    let mut payment = payment::router();
    if rate_limited {
        if let Some(layer) = checkout_rate_limiter() {
            checkout = checkout.layer(layer);
        }
        if let Some(layer) = payment_rate_limiter() {
            payment = payment.layer(layer);
        }
    }

    Router::new()
        .merge(products::router())
        .nest("/cart", cart::router())
        .nest("/checkout", checkout)
        .nest("/payment", payment.merge(payment::webhook_router()))
}

/// The visitor's mutable cart, created on first use and remembered in the session.
pub(crate) async fn visitor_cart(
    state: &AppState,
    session: &Session,
    user: Option<&CurrentUser>,
) -> Result<Cart> {
    let remembered = session_cart_id(session).await;
    let cart = state
        .carts()
        .get_or_create_active(remembered, user.map(|u| u.id))
        .await?;

    if remembered != Some(cart.id) {
        set_session_cart_id(session, cart.id)
            .await
            .map_err(|e| AppError::Internal(format!("session write failed: {e}")))?;
    }
    Ok(cart)
}

/// A checkout session the visitor may act on; anyone else gets a 404.
pub(crate) async fn visitor_checkout(
    state: &AppState,
    session: &Session,
    user: Option<&CurrentUser>,
    id: CheckoutSessionId,
) -> Result<CheckoutSession> {
    let checkout = state.checkout().get(id).await?;
    let cart_matches = session_cart_id(session).await == Some(checkout.cart_id);
    let owner_matches = checkout
        .profile_id
        .is_some_and(|owner| user.is_some_and(|u| u.id == owner));

    if cart_matches || owner_matches {
        Ok(checkout)
    } else {
        tracing::debug!(checkout_session_id = %id, "Checkout session not owned by visitor");
        Err(CheckoutError::NotFound.into())
    }
}
