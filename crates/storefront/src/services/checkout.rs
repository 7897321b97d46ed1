//! Checkout sessions.
//!
//! A session walks `information → shipping → payment → review` as the customer
//! fills in details and is frozen at `confirmation` once the order is placed.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::instrument;

use meridian_core::{
    CheckoutSessionId, CheckoutStep, Email, InvalidStatus, OrderId, ProviderKind,
};

use super::cart::{CartError, CartService};
use super::shipping::ShippingService;
use crate::db::{CheckoutSessionRepository, RepositoryError};
use crate::models::{Address, Cart, CheckoutSession, OrderTotals};

/// Errors from checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Checkout session not found")]
    NotFound,

    #[error("Checkout session has already been confirmed")]
    Confirmed,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Unknown shipping option '{0}'")]
    UnknownShippingOption(String),

    #[error("A shipping address is required before choosing shipping")]
    MissingShippingAddress,

    #[error("Checkout step '{0}' cannot be set directly")]
    StepNotAllowed(CheckoutStep),

    #[error(transparent)]
    InvalidStep(#[from] InvalidStatus),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Contact and address details for the `information` step.
#[derive(Debug, Clone)]
pub struct CheckoutInformation {
    pub email: Email,
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    pub billing_address: Option<Address>,
}

/// Checkout session service.
#[derive(Clone)]
pub struct CheckoutService {
    sessions: Arc<dyn CheckoutSessionRepository>,
    carts: CartService,
    shipping: ShippingService,
    tax_rate: Decimal,
}

impl CheckoutService {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn CheckoutSessionRepository>,
        carts: CartService,
        shipping: ShippingService,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            sessions,
            carts,
            shipping,
            tax_rate,
        }
    }

    /// Open a session for a cart and move the cart to `checkout`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyCart`, or a cart error if the cart is no longer mutable.
    #[instrument(skip(self, cart, email), fields(cart_id = %cart.id))]
    pub async fn start(
        &self,
        cart: &Cart,
        email: Option<Email>,
    ) -> Result<CheckoutSession, CheckoutError> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        self.carts.mark_checkout(cart.id).await?;

        let session = self
            .sessions
            .create(&CheckoutSession::new(cart.id, cart.profile_id, email))
            .await?;
        tracing::info!(checkout_session_id = %session.id, "Checkout started");
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    pub async fn get(&self, id: CheckoutSessionId) -> Result<CheckoutSession, CheckoutError> {
        self.sessions.get(id).await?.ok_or(CheckoutError::NotFound)
    }

    async fn get_open(&self, id: CheckoutSessionId) -> Result<CheckoutSession, CheckoutError> {
        let session = self.get(id).await?;
        if session.is_confirmed() {
            return Err(CheckoutError::Confirmed);
        }
        Ok(session)
    }

    async fn save(&self, session: &CheckoutSession) -> Result<CheckoutSession, CheckoutError> {
        match self.sessions.update(session).await {
            Err(RepositoryError::Conflict(_)) => Err(CheckoutError::Confirmed),
            other => Ok(other?),
        }
    }

    /// Record contact details and addresses, then move to `shipping`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Confirmed`.
    #[instrument(skip(self, info))]
    pub async fn update_information(
        &self,
        id: CheckoutSessionId,
        info: CheckoutInformation,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.get_open(id).await?;
        session.billing_address = Some(
            info.billing_address
                .unwrap_or_else(|| info.shipping_address.clone()),
        );
        session.shipping_address = Some(info.shipping_address);
        session.email = Some(info.email);
        session.step = CheckoutStep::Shipping;
        self.save(&session).await
    }

    /// Price the chosen option against the cart subtotal, then move to `payment`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownShippingOption`, `MissingShippingAddress`, `NotFound`
    /// or `Confirmed`.
    #[instrument(skip(self))]
    pub async fn select_shipping(
        &self,
        id: CheckoutSessionId,
        option_id: &str,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.get_open(id).await?;
        if session.shipping_address.is_none() {
            return Err(CheckoutError::MissingShippingAddress);
        }
        let cart = self.carts.get(session.cart_id).await?;
        let option = self
            .shipping
            .option(option_id, cart.subtotal())
            .ok_or_else(|| CheckoutError::UnknownShippingOption(option_id.to_string()))?;

        session.shipping_option_id = Some(option.id.to_string());
        session.shipping_cost = Some(option.price);
        session.step = CheckoutStep::Payment;
        self.save(&session).await
    }

    /// Record the payment intent created for this session, then move to `review`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Confirmed`.
    #[instrument(skip(self))]
    pub async fn attach_payment(
        &self,
        id: CheckoutSessionId,
        payment_intent_id: &str,
        provider: ProviderKind,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.get_open(id).await?;
        session.payment_intent_id = Some(payment_intent_id.to_string());
        session.payment_provider = Some(provider);
        session.step = CheckoutStep::Review;
        self.save(&session).await
    }

    /// Move to a named step, e.g. back to `information` to edit the address.
    ///
    /// `confirmation` is only reached through [`Self::complete`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidStep` for strings outside the step set,
    /// `StepNotAllowed` for `confirmation`, `NotFound` or `Confirmed`.
    #[instrument(skip(self))]
    pub async fn set_step(
        &self,
        id: CheckoutSessionId,
        step: &str,
    ) -> Result<CheckoutSession, CheckoutError> {
        let step: CheckoutStep = step.parse()?;
        if step.is_terminal() {
            return Err(CheckoutError::StepNotAllowed(step));
        }
        let mut session = self.get_open(id).await?;
        session.step = step;
        self.save(&session).await
    }

    /// Freeze the session at `confirmation` with the placed order's id.
    ///
    /// # Errors
    ///
    /// Returns `Confirmed` if the session was already confirmed.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        id: CheckoutSessionId,
        order_id: OrderId,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.get_open(id).await?;
        session.order_id = Some(order_id);
        session.step = CheckoutStep::Confirmation;
        self.save(&session).await
    }

    /// The session's cart and its money breakdown.
    ///
    /// Shipping counts as zero until an option is chosen.
    ///
    /// # Errors
    ///
    /// Returns a cart error if the cart is gone.
    pub async fn totals(
        &self,
        session: &CheckoutSession,
    ) -> Result<(Cart, OrderTotals), CheckoutError> {
        let cart = self.carts.get(session.cart_id).await?;
        let totals = OrderTotals::compute(
            cart.subtotal(),
            session.shipping_cost.unwrap_or(Decimal::ZERO),
            self.tax_rate,
        );
        Ok((cart, totals))
    }
}
