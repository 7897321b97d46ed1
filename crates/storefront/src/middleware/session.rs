//! Session middleware configuration and the cart id session key.
//!
//! Sessions are `PostgreSQL`-backed via tower-sessions. The store's table is
//! created by the CLI `migrate` command.

use tower_sessions::{Expiry, Session, SessionManagerLayer, SessionStore};

use meridian_core::CartId;

use crate::config::StorefrontConfig;
use crate::models::session_keys;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "meridian_session";

/// Session expiry time in seconds (7 days).
const SESSION_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Session layer over any store; the server passes the `PostgreSQL` store.
#[must_use]
pub fn session_layer<S: SessionStore + Clone>(
    store: S,
    config: &StorefrontConfig,
) -> SessionManagerLayer<S> {
    // Secure cookies only when served over HTTPS
    let is_secure = config.base_url.starts_with("https://");

    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(is_secure)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

/// The cart id remembered for this visitor, if any.
pub async fn session_cart_id(session: &Session) -> Option<CartId> {
    session
        .get::<CartId>(session_keys::CART_ID)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read cart id from session");
            None
        })
}

/// Remember the visitor's cart.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_session_cart_id(
    session: &Session,
    cart_id: CartId,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CART_ID, cart_id).await
}
