//! Profile management.
//!
//! Profiles are created by the external sign-in flow; this only changes the
//! role of an existing one. The admin console checks the role on every request,
//! so a change takes effect immediately.
//!
//! ```bash
//! meridian profile set-role -e owner@example.com -r admin
//! ```

use meridian_core::{Email, UserRole};
use meridian_storefront::db::{PgProfileRepository, ProfileRepository, RepositoryError};

use super::{CommandError, connect};

/// Set the role of the profile with `email`.
///
/// # Errors
///
/// Returns an error for an invalid email or role, an unknown profile, or a
/// database failure.
pub async fn set_role(email: &str, role: &str) -> Result<(), CommandError> {
    let email = Email::parse(email)?;
    let role: UserRole = role.parse()?;

    let profiles = PgProfileRepository::new(connect().await?);
    match profiles.set_role(&email, role).await {
        Ok(profile) => {
            tracing::info!(profile_id = %profile.id, email = %profile.email, role = %profile.role, "Profile role updated");
            Ok(())
        }
        Err(RepositoryError::NotFound) => Err(CommandError::ProfileNotFound(email.to_string())),
        Err(e) => Err(e.into()),
    }
}
