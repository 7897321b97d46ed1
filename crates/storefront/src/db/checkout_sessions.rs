//! Checkout session repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;

use meridian_core::{CartId, CheckoutSessionId, CheckoutStep, Email, OrderId, ProfileId};

use super::{RepositoryError, parse_column, parse_optional_column};
use crate::models::{Address, CheckoutSession};

/// Storage for checkout sessions.
#[async_trait]
pub trait CheckoutSessionRepository: Send + Sync {
    /// Insert a new session.
    async fn create(&self, session: &CheckoutSession) -> Result<CheckoutSession, RepositoryError>;

    /// Get a session by ID.
    async fn get(&self, id: CheckoutSessionId) -> Result<Option<CheckoutSession>, RepositoryError>;

    /// Write every mutable field of the session.
    ///
    /// Sessions already at `confirmation` are never rewritten: the write
    /// returns `Conflict` instead.
    async fn update(&self, session: &CheckoutSession) -> Result<CheckoutSession, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct CheckoutSessionRow {
    id: CheckoutSessionId,
    cart_id: CartId,
    profile_id: Option<ProfileId>,
    step: String,
    email: Option<String>,
    shipping_address: Option<Json<Address>>,
    billing_address: Option<Json<Address>>,
    shipping_option_id: Option<String>,
    shipping_cost: Option<Decimal>,
    payment_intent_id: Option<String>,
    payment_provider: Option<String>,
    order_id: Option<OrderId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CheckoutSessionRow> for CheckoutSession {
    type Error = RepositoryError;

    fn try_from(row: CheckoutSessionRow) -> Result<Self, Self::Error> {
        let email = row
            .email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid email in database: {e}")))?;

        Ok(Self {
            id: row.id,
            cart_id: row.cart_id,
            profile_id: row.profile_id,
            step: parse_column(&row.step, "checkout step")?,
            email,
            shipping_address: row.shipping_address.map(|Json(a)| a),
            billing_address: row.billing_address.map(|Json(a)| a),
            shipping_option_id: row.shipping_option_id,
            shipping_cost: row.shipping_cost,
            payment_intent_id: row.payment_intent_id,
            payment_provider: parse_optional_column(
                row.payment_provider.as_deref(),
                "payment provider",
            )?,
            order_id: row.order_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = r"
    id, cart_id, profile_id, step, email, shipping_address, billing_address,
    shipping_option_id, shipping_cost, payment_intent_id, payment_provider, order_id,
    created_at, updated_at
";

/// `PostgreSQL` checkout session repository.
#[derive(Clone)]
pub struct PgCheckoutSessionRepository {
    pool: PgPool,
}

impl PgCheckoutSessionRepository {
    /// Create a new checkout session repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckoutSessionRepository for PgCheckoutSessionRepository {
    async fn create(&self, session: &CheckoutSession) -> Result<CheckoutSession, RepositoryError> {
        let row = sqlx::query_as::<_, CheckoutSessionRow>(&format!(
            r"
            INSERT INTO checkout_sessions (id, cart_id, profile_id, step, email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COLUMNS}
            "
        ))
        .bind(session.id)
        .bind(session.cart_id)
        .bind(session.profile_id)
        .bind(session.step.as_str())
        .bind(session.email.as_ref().map(Email::as_str))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: CheckoutSessionId) -> Result<Option<CheckoutSession>, RepositoryError> {
        let row = sqlx::query_as::<_, CheckoutSessionRow>(&format!(
            "SELECT {COLUMNS} FROM checkout_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CheckoutSession::try_from).transpose()
    }

    async fn update(&self, session: &CheckoutSession) -> Result<CheckoutSession, RepositoryError> {
        let row = sqlx::query_as::<_, CheckoutSessionRow>(&format!(
            r"
            UPDATE checkout_sessions
            SET step = $2,
                email = $3,
                shipping_address = $4,
                billing_address = $5,
                shipping_option_id = $6,
                shipping_cost = $7,
                payment_intent_id = $8,
                payment_provider = $9,
                order_id = $10,
                updated_at = NOW()
            WHERE id = $1 AND step <> $11
            RETURNING {COLUMNS}
            "
        ))
        .bind(session.id)
        .bind(session.step.as_str())
        .bind(session.email.as_ref().map(Email::as_str))
        .bind(session.shipping_address.as_ref().map(Json))
        .bind(session.billing_address.as_ref().map(Json))
        .bind(&session.shipping_option_id)
        .bind(session.shipping_cost)
        .bind(&session.payment_intent_id)
        .bind(session.payment_provider.map(|p| p.as_str()))
        .bind(session.order_id)
        .bind(CheckoutStep::Confirmation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(RepositoryError::Conflict(
                "checkout session is missing or already confirmed".to_string(),
            )),
        }
    }
}
