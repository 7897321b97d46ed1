//! Profile repository.
//!
//! Profiles are created by the external sign-in flow. The storefront only
//! reads them for authorization; the CLI can change roles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use meridian_core::{Email, ProfileId, UserRole};

use super::{RepositoryError, parse_column};
use crate::models::Profile;

/// Read access to profiles, plus role changes for operators.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Get a profile by ID.
    async fn get(&self, id: ProfileId) -> Result<Option<Profile>, RepositoryError>;

    /// Get a profile by email address.
    async fn get_by_email(&self, email: &Email) -> Result<Option<Profile>, RepositoryError>;

    /// Change a profile's role. Returns `NotFound` if no profile has that email.
    async fn set_role(&self, email: &Email, role: UserRole) -> Result<Profile, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: ProfileId,
    email: String,
    full_name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = RepositoryError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: row.id,
            email,
            full_name: row.full_name,
            role: parse_column(&row.role, "user role")?,
            created_at: row.created_at,
        })
    }
}

/// `PostgreSQL` profile repository.
#[derive(Clone)]
pub struct PgProfileRepository {
    pool: PgPool,
}

impl PgProfileRepository {
    /// Create a new profile repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn get(&self, id: ProfileId) -> Result<Option<Profile>, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, email, full_name, role, created_at FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Profile::try_from).transpose()
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<Profile>, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, email, full_name, role, created_at FROM profiles WHERE email = $1",
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Profile::try_from).transpose()
    }

    async fn set_role(&self, email: &Email, role: UserRole) -> Result<Profile, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            UPDATE profiles SET role = $2, updated_at = NOW()
            WHERE email = $1
            RETURNING id, email, full_name, role, created_at
            ",
        )
        .bind(email.as_str())
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(RepositoryError::NotFound)?.try_into()
    }
}
