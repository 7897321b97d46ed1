//! Profile domain type.

use chrono::{DateTime, Utc};
use serde::Serialize;

use meridian_core::{Email, ProfileId, UserRole};

/// A user profile. Read-only here apart from the CLI role command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    pub email: Email,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
