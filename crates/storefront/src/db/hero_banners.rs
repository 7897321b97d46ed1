//! Hero banner repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use meridian_core::HeroBannerId;

use super::RepositoryError;
use crate::models::{HeroBanner, HeroBannerInput};

/// Storage for homepage hero banners.
#[async_trait]
pub trait HeroBannerRepository: Send + Sync {
    /// Banners ordered by position.
    async fn list(&self, active_only: bool) -> Result<Vec<HeroBanner>, RepositoryError>;

    async fn create(&self, input: &HeroBannerInput) -> Result<HeroBanner, RepositoryError>;

    /// Returns `None` if the banner does not exist.
    async fn update(
        &self,
        id: HeroBannerId,
        input: &HeroBannerInput,
    ) -> Result<Option<HeroBanner>, RepositoryError>;

    /// Returns `false` if the banner did not exist.
    async fn delete(&self, id: HeroBannerId) -> Result<bool, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct HeroBannerRow {
    id: HeroBannerId,
    title: String,
    subtitle: Option<String>,
    image_url: String,
    link_url: Option<String>,
    cta_label: Option<String>,
    position: i32,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<HeroBannerRow> for HeroBanner {
    fn from(row: HeroBannerRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            subtitle: row.subtitle,
            image_url: row.image_url,
            link_url: row.link_url,
            cta_label: row.cta_label,
            position: row.position,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const COLUMNS: &str = r"
    id, title, subtitle, image_url, link_url, cta_label, position, active,
    created_at, updated_at
";

/// `PostgreSQL` hero banner repository.
#[derive(Clone)]
pub struct PgHeroBannerRepository {
    pool: PgPool,
}

impl PgHeroBannerRepository {
    /// Create a new hero banner repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HeroBannerRepository for PgHeroBannerRepository {
    async fn list(&self, active_only: bool) -> Result<Vec<HeroBanner>, RepositoryError> {
        let rows = sqlx::query_as::<_, HeroBannerRow>(&format!(
            "SELECT {COLUMNS} FROM hero_banners WHERE active OR NOT $1 ORDER BY position, created_at"
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HeroBanner::from).collect())
    }

    async fn create(&self, input: &HeroBannerInput) -> Result<HeroBanner, RepositoryError> {
        let row = sqlx::query_as::<_, HeroBannerRow>(&format!(
            r"
            INSERT INTO hero_banners (id, title, subtitle, image_url, link_url, cta_label, position, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {COLUMNS}
            "
        ))
        .bind(HeroBannerId::new())
        .bind(&input.title)
        .bind(&input.subtitle)
        .bind(&input.image_url)
        .bind(&input.link_url)
        .bind(&input.cta_label)
        .bind(input.position)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn update(
        &self,
        id: HeroBannerId,
        input: &HeroBannerInput,
    ) -> Result<Option<HeroBanner>, RepositoryError> {
        let row = sqlx::query_as::<_, HeroBannerRow>(&format!(
            r"
            UPDATE hero_banners
            SET title = $2, subtitle = $3, image_url = $4, link_url = $5, cta_label = $6,
                position = $7, active = $8, updated_at = NOW()
            WHERE id = $1
            RETURNING {COLUMNS}
            "
        ))
        .bind(id)
        .bind(&input.title)
        .bind(&input.subtitle)
        .bind(&input.image_url)
        .bind(&input.link_url)
        .bind(&input.cta_label)
        .bind(input.position)
        .bind(input.active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HeroBanner::from))
    }

    async fn delete(&self, id: HeroBannerId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM hero_banners WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
