//! Session-related types.
//!
//! The session is populated by the external sign-in flow; this crate only
//! reads the user identity and keeps the guest cart id.

use serde::{Deserialize, Serialize};

use meridian_core::{Email, ProfileId};

/// Session-stored user identity.
///
/// Minimal data stored in the session to identify the signed-in user. The
/// role is not cached here: admin checks always load the profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Profile ID.
    pub id: ProfileId,
    /// User's email address.
    pub email: Email,
}

/// Session keys.
pub mod keys {
    /// Key for storing the current signed-in user.
    pub const CURRENT_USER: &str = "current_user";

    /// Key for storing the cart ID (guest and signed-in).
    pub const CART_ID: &str = "cart_id";
}
