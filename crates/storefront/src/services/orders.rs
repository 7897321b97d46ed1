//! Order placement and administration.
//!
//! Placement checks that the payment belongs to the checkout and covers its
//! total, verifies it with the provider (unless none was taken), then performs
//! three independent writes: the order insert, the cart completion and the checkout
//! confirmation. A failure after the insert is logged with the order id and
//! reported as [`OrderError::Incomplete`]; nothing is rolled back.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::instrument;

use meridian_core::{
    CartStatus, CheckoutSessionId, CurrencyCode, InvalidStatus, OrderId, OrderItemId, OrderStatus,
    PaymentStatus, Price, ProviderKind, generate_order_number,
};

use super::cart::{CartError, CartService};
use super::checkout::{CheckoutError, CheckoutService};
use crate::db::{OrderRepository, RepositoryError};
use crate::models::{CheckoutSession, Order, OrderFilter, OrderItem, OrderPage};
use crate::payments::{PaymentResult, PaymentService, WebhookUpdate};

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found")]
    NotFound,

    #[error("Checkout session not found")]
    SessionNotFound,

    #[error("An order has already been placed for this checkout")]
    AlreadyPlaced,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Payment could not be verified: {0}")]
    PaymentNotVerified(String),

    /// The payment is real but was not taken for this checkout as it stands.
    #[error("Payment does not match this checkout: {0}")]
    PaymentMismatch(String),

    /// A refund larger than what the order was paid.
    #[error("Refund of {requested} exceeds the order total of {total}")]
    RefundExceedsTotal { requested: Decimal, total: Decimal },

    #[error("Order has no payment to act on")]
    NoPayment,

    #[error("{0}")]
    Payment(String),

    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatus),

    /// The order row exists but a later placement write failed.
    #[error("Order {order_id} was created but {step} failed: {message}")]
    Incomplete {
        order_id: OrderId,
        step: &'static str,
        message: String,
    },

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A place-order request.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub session_id: CheckoutSessionId,
    /// `None` skips payment verification; the order is created `pending`.
    pub payment_intent_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub payment_provider: Option<String>,
}

/// A placed order with the verification that allowed it.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: Option<PaymentResult>,
    pub session_id: CheckoutSessionId,
}

/// Order service.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    carts: CartService,
    checkout: CheckoutService,
    payments: PaymentService,
    currency: CurrencyCode,
}

impl OrderService {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        carts: CartService,
        checkout: CheckoutService,
        payments: PaymentService,
        currency: CurrencyCode,
    ) -> Self {
        Self {
            orders,
            carts,
            checkout,
            payments,
            currency,
        }
    }

    /// Verify the payment and place the order for a checkout session.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `AlreadyPlaced` when the session is confirmed or the
    /// cart completed, `EmptyCart`, `PaymentMismatch` when the intent is not
    /// the one attached to the session, `PaymentNotVerified` when the provider
    /// does not report the payment as paid or authorized, and the errors of
    /// [`Self::create_order_from_checkout`].
    #[instrument(skip(self, request), fields(checkout_session_id = %request.session_id))]
    pub async fn place_order(&self, request: PlaceOrder) -> Result<PlacedOrder, OrderError> {
        let session = match self.checkout.get(request.session_id).await {
            Ok(session) => session,
            Err(CheckoutError::NotFound) => return Err(OrderError::SessionNotFound),
            Err(e) => return Err(e.into()),
        };
        if session.is_confirmed() {
            return Err(OrderError::AlreadyPlaced);
        }
        let cart = self.carts.get(session.cart_id).await?;
        if cart.status == CartStatus::Completed {
            return Err(OrderError::AlreadyPlaced);
        }
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let (verification, provider) = match request.payment_intent_id.as_deref() {
            Some(intent) => {
                let provider =
                    attached_provider(&session, intent, request.payment_provider.as_deref())?;
                let result = self
                    .payments
                    .verify_payment(intent, Some(provider.as_str()))
                    .await;
                if !result.success {
                    let message = result
                        .error
                        .unwrap_or_else(|| "Payment was not successful".to_string());
                    tracing::warn!(payment_intent_id = intent, error = %message, "Payment verification failed");
                    return Err(OrderError::PaymentNotVerified(message));
                }
                (Some(result), Some(provider))
            }
            None => (None, None),
        };

        let order = self
            .create_order_from_checkout(
                &session,
                request.payment_intent_id.as_deref(),
                request.payment_method_id.as_deref(),
                provider,
                verification.as_ref(),
            )
            .await?;

        Ok(PlacedOrder {
            order,
            payment: verification,
            session_id: session.id,
        })
    }

    /// Build the order from the session's cart and run the placement writes.
    ///
    /// # Errors
    ///
    /// `PaymentMismatch` if `payment` does not report exactly the order total,
    /// `AlreadyPlaced` if another order already holds this session, the
    /// repository error if the order insert fails (nothing was written), or
    /// `Incomplete` if the cart or session write fails after it.
    #[instrument(skip_all, fields(checkout_session_id = %session.id))]
    pub async fn create_order_from_checkout(
        &self,
        session: &CheckoutSession,
        payment_intent_id: Option<&str>,
        payment_method_id: Option<&str>,
        provider: Option<ProviderKind>,
        payment: Option<&PaymentResult>,
    ) -> Result<Order, OrderError> {
        let (cart, totals) = self.checkout.totals(session).await?;
        if let Some(payment) = payment {
            self.check_amount(payment, totals.total)?;
        }
        let payment_status = payment
            .and_then(|p| p.status)
            .unwrap_or(PaymentStatus::Pending);

        let now = Utc::now();
        let id = OrderId::new();
        let items = cart
            .items
            .iter()
            .map(|item| OrderItem {
                id: OrderItemId::new(),
                order_id: id,
                product_id: Some(item.product_id),
                name: item.name.clone(),
                unit_price: item.unit_price,
                quantity: item.quantity,
                total: item.line_total(),
            })
            .collect();

        let order = Order {
            id,
            order_number: generate_order_number(now),
            status: OrderStatus::for_new_order(payment_status),
            payment_status,
            payment_provider: provider,
            payment_intent_id: payment_intent_id.map(str::to_string),
            payment_id: payment.and_then(|p| p.payment_id.clone()),
            payment_method_id: payment_method_id.map(str::to_string),
            email: session.email.clone(),
            shipping_address: session.shipping_address.clone(),
            billing_address: session.billing_address.clone(),
            shipping_option_id: session.shipping_option_id.clone(),
            subtotal: totals.subtotal,
            shipping: totals.shipping,
            tax: totals.tax,
            total: totals.total,
            currency: self.currency,
            items,
            profile_id: session.profile_id,
            checkout_session_id: Some(session.id),
            cart_id: Some(cart.id),
            created_at: now,
            updated_at: now,
        };

        let order = match self.orders.create(&order).await {
            Ok(order) => order,
            Err(RepositoryError::Conflict(message)) => {
                tracing::warn!(checkout_session_id = %session.id, %message, "Order insert conflicted");
                return Err(OrderError::AlreadyPlaced);
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total,
            payment_status = %order.payment_status,
            "Order created"
        );

        if let Err(e) = self.carts.complete(cart.id).await {
            tracing::error!(order_id = %order.id, cart_id = %cart.id, error = %e, "Order placed but cart completion failed");
            return Err(OrderError::Incomplete {
                order_id: order.id,
                step: "cart completion",
                message: e.to_string(),
            });
        }
        if let Err(e) = self.checkout.complete(session.id, order.id).await {
            tracing::error!(order_id = %order.id, checkout_session_id = %session.id, error = %e, "Order placed but checkout confirmation failed");
            return Err(OrderError::Incomplete {
                order_id: order.id,
                step: "checkout confirmation",
                message: e.to_string(),
            });
        }

        Ok(order)
    }

    fn check_amount(&self, payment: &PaymentResult, total: Decimal) -> Result<(), OrderError> {
        let Some(paid) = payment.amount else {
            return Err(OrderError::PaymentMismatch(
                "the provider did not report a payment amount".to_string(),
            ));
        };
        if paid.currency_code != self.currency || paid.amount != total {
            tracing::warn!(
                payment_id = ?payment.payment_id,
                paid = %paid.amount,
                currency = %paid.currency_code.code(),
                total = %total,
                "Verified amount differs from checkout total"
            );
            return Err(OrderError::PaymentMismatch(format!(
                "paid {} {} but the order total is {} {}",
                paid.amount,
                paid.currency_code.code(),
                total,
                self.currency.code()
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// # Errors
    ///
    /// Returns the repository error.
    pub async fn list(&self, filter: &OrderFilter) -> Result<OrderPage, OrderError> {
        Ok(self.orders.list(filter).await?)
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist.
    pub async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        self.orders.get(id).await?.ok_or(OrderError::NotFound)
    }

    /// Set the order status from a string after checking it is an order status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` or `NotFound`.
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: OrderId, status: &str) -> Result<Order, OrderError> {
        let status: OrderStatus = status.parse()?;
        let order = self
            .orders
            .update_status(id, status)
            .await?
            .ok_or(OrderError::NotFound)?;
        tracing::info!(order_id = %id, status = %status, "Order status updated");
        Ok(order)
    }

    /// Set the payment status from a string after checking it is a payment status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` or `NotFound`.
    #[instrument(skip(self))]
    pub async fn update_payment_status(
        &self,
        id: OrderId,
        payment_status: &str,
    ) -> Result<Order, OrderError> {
        let payment_status: PaymentStatus = payment_status.parse()?;
        let order = self
            .orders
            .update_payment_status(id, payment_status, None)
            .await?
            .ok_or(OrderError::NotFound)?;
        tracing::info!(order_id = %id, payment_status = %payment_status, "Order payment status updated");
        Ok(order)
    }

    /// Capture the order's authorized payment and mark it paid.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NoPayment`, or `Payment` with the provider's error.
    #[instrument(skip(self))]
    pub async fn capture_payment(&self, id: OrderId) -> Result<(Order, PaymentResult), OrderError> {
        let order = self.get(id).await?;
        let (reference, provider) = payment_target(&order)?;
        let result = self
            .payments
            .capture_payment(&reference, provider.as_deref())
            .await;
        self.record_payment_outcome(&order, result, OrderStatus::Paid)
            .await
    }

    /// Void the order's payment and cancel the order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NoPayment`, or `Payment` with the provider's error.
    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, id: OrderId) -> Result<(Order, PaymentResult), OrderError> {
        let order = self.get(id).await?;
        let (reference, provider) = payment_target(&order)?;
        let result = self
            .payments
            .cancel_payment(&reference, provider.as_deref())
            .await;
        self.record_payment_outcome(&order, result, OrderStatus::Cancelled)
            .await
    }

    /// Refund the order's payment, in full or `amount` of it.
    ///
    /// Only a full refund moves the order to `refunded`; an `amount` equal to
    /// the total counts as full.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NoPayment`, `RefundExceedsTotal`, or `Payment`
    /// with the provider's error.
    #[instrument(skip(self))]
    pub async fn refund_payment(
        &self,
        id: OrderId,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> Result<(Order, PaymentResult), OrderError> {
        let order = self.get(id).await?;
        if let Some(requested) = amount
            && requested > order.total
        {
            return Err(OrderError::RefundExceedsTotal {
                requested,
                total: order.total,
            });
        }
        let (reference, provider) = payment_target(&order)?;
        let amount = amount.filter(|a| *a < order.total);
        let result = self
            .payments
            .refund_payment(
                &reference,
                provider.as_deref(),
                amount.map(|a| Price::new(a, order.currency)),
                reason,
            )
            .await;

        if amount.is_some() && result.success {
            tracing::info!(order_id = %order.id, amount = ?amount, "Partial refund issued");
            return Ok((order, result));
        }
        self.record_payment_outcome(&order, result, OrderStatus::Refunded)
            .await
    }

    async fn record_payment_outcome(
        &self,
        order: &Order,
        result: PaymentResult,
        status: OrderStatus,
    ) -> Result<(Order, PaymentResult), OrderError> {
        if !result.success {
            return Err(OrderError::Payment(
                result
                    .error
                    .unwrap_or_else(|| "Payment operation failed".to_string()),
            ));
        }
        let payment_status = result.status.unwrap_or(PaymentStatus::Paid);
        let updated = self
            .orders
            .update_payment_status(order.id, payment_status, Some(status))
            .await?
            .ok_or(OrderError::NotFound)?;
        tracing::info!(order_id = %order.id, status = %status, payment_status = %payment_status, "Order payment updated");
        Ok((updated, result))
    }

    /// Apply a verified webhook to the order it refers to.
    ///
    /// Returns `None` when no order matches. Refunds and cancellations always
    /// move the order status; other updates only move orders that have not
    /// progressed past payment.
    ///
    /// # Errors
    ///
    /// Returns the repository error.
    #[instrument(skip(self, update), fields(provider = %update.provider, event = %update.event_type))]
    pub async fn apply_webhook_update(
        &self,
        update: &WebhookUpdate,
    ) -> Result<Option<Order>, OrderError> {
        let mut order = self
            .orders
            .find_by_payment_reference(update.provider, &update.reference)
            .await?;
        if order.is_none()
            && let Some(payment_id) = update.payment_id.as_deref()
        {
            order = self
                .orders
                .find_by_payment_reference(update.provider, payment_id)
                .await?;
        }
        let Some(order) = order else {
            tracing::debug!(reference = %update.reference, "Webhook matched no order");
            return Ok(None);
        };

        let status = match update.status {
            PaymentStatus::Refunded | PaymentStatus::Cancelled => {
                Some(OrderStatus::for_new_order(update.status))
            }
            _ if matches!(
                order.status,
                OrderStatus::Pending
                    | OrderStatus::Processing
                    | OrderStatus::Created
                    | OrderStatus::PaymentFailed
            ) =>
            {
                Some(OrderStatus::for_new_order(update.status))
            }
            _ => None,
        };

        let updated = self
            .orders
            .update_payment_status(order.id, update.status, status)
            .await?;
        tracing::info!(order_id = %order.id, payment_status = %update.status, "Order updated from webhook");
        Ok(updated)
    }
}

/// The provider the session's payment was started with, provided `intent` is
/// the intent attached to the session and `requested` (if any) names the same
/// provider.
fn attached_provider(
    session: &CheckoutSession,
    intent: &str,
    requested: Option<&str>,
) -> Result<ProviderKind, OrderError> {
    let (Some(attached), Some(provider)) =
        (session.payment_intent_id.as_deref(), session.payment_provider)
    else {
        return Err(OrderError::PaymentMismatch(
            "no payment was started for this checkout".to_string(),
        ));
    };
    if attached != intent {
        return Err(OrderError::PaymentMismatch(
            "payment intent was not created for this checkout".to_string(),
        ));
    }
    if let Some(requested) = requested.map(str::trim).filter(|r| !r.is_empty())
        && !requested.eq_ignore_ascii_case(provider.as_str())
    {
        return Err(OrderError::PaymentMismatch(format!(
            "payment was started with {provider}, not {requested}"
        )));
    }
    Ok(provider)
}

fn payment_target(order: &Order) -> Result<(String, Option<String>), OrderError> {
    let reference = order.payment_reference().ok_or(OrderError::NoPayment)?;
    Ok((
        reference.to_string(),
        order.payment_provider.map(|kind| kind.to_string()),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use meridian_core::{CheckoutStep, Email};

    use super::*;
    use crate::db::ProductRepository;
    use crate::db::memory::{FailPoint, InMemoryDatabase};
    use crate::models::ProductInput;
    use crate::payments::OrderMeta;
    use crate::payments::testing::ScriptedProvider;
    use crate::services::checkout::CheckoutInformation;
    use crate::services::shipping::ShippingService;

    struct Fixture {
        db: InMemoryDatabase,
        provider: Arc<ScriptedProvider>,
        payments: PaymentService,
        carts: CartService,
        checkout: CheckoutService,
        orders: OrderService,
    }

    impl Fixture {
        fn new() -> Self {
            let db = InMemoryDatabase::new();
            let provider = Arc::new(ScriptedProvider::new(ProviderKind::Stripe));
            let mut payments = PaymentService::default();
            payments.register(provider.clone());

            let carts = CartService::new(Arc::new(db.clone()), Arc::new(db.clone()));
            let checkout = CheckoutService::new(
                Arc::new(db.clone()),
                carts.clone(),
                ShippingService::new(Decimal::new(7500, 2)),
                Decimal::ZERO,
            );
            let orders = OrderService::new(
                Arc::new(db.clone()),
                carts.clone(),
                checkout.clone(),
                payments.clone(),
                CurrencyCode::USD,
            );
            Self {
                db,
                provider,
                payments,
                carts,
                checkout,
                orders,
            }
        }

        async fn session(&self) -> CheckoutSession {
            let product = ProductRepository::create(
                &self.db,
                &ProductInput {
                    name: "Canvas Tote".to_string(),
                    slug: format!("canvas-tote-{}", uuid::Uuid::new_v4().simple()),
                    description: None,
                    price: Decimal::new(2400, 2),
                    currency: None,
                    inventory_quantity: 10,
                    active: true,
                },
                CurrencyCode::USD,
            )
            .await
            .unwrap();
            let cart = self.carts.get_or_create_active(None, None).await.unwrap();
            let cart = self.carts.add_item(cart.id, product.id, 2).await.unwrap();
            let session = self
                .checkout
                .start(&cart, Some(Email::parse("buyer@example.com").unwrap()))
                .await
                .unwrap();
            self.checkout
                .update_information(
                    session.id,
                    CheckoutInformation {
                        email: Email::parse("buyer@example.com").unwrap(),
                        shipping_address: crate::models::Address {
                            first_name: "Sam".to_string(),
                            last_name: "Reyes".to_string(),
                            line1: "400 Pine St".to_string(),
                            line2: None,
                            city: "Portland".to_string(),
                            region: Some("OR".to_string()),
                            postal_code: "97204".to_string(),
                            country: "US".to_string(),
                            phone: None,
                        },
                        billing_address: None,
                    },
                )
                .await
                .unwrap();
            self.checkout
                .select_shipping(session.id, "standard")
                .await
                .unwrap()
        }

        /// Create an intent for the session's current total and attach it.
        async fn start_payment(&self, session: &CheckoutSession) -> String {
            let (_, totals) = self.checkout.totals(session).await.unwrap();
            let intent = self
                .payments
                .create_payment(
                    Some("stripe"),
                    Price::new(totals.total, CurrencyCode::USD),
                    &OrderMeta::default(),
                )
                .await
                .unwrap();
            self.checkout
                .attach_payment(session.id, &intent.payment_intent_id, intent.provider)
                .await
                .unwrap();
            intent.payment_intent_id
        }

        async fn paid_session(&self) -> (CheckoutSession, String) {
            let session = self.session().await;
            let intent = self.start_payment(&session).await;
            (session, intent)
        }
    }

    fn paid_request(session: &CheckoutSession, intent: &str) -> PlaceOrder {
        PlaceOrder {
            session_id: session.id,
            payment_intent_id: Some(intent.to_string()),
            payment_method_id: Some("pm_card".to_string()),
            payment_provider: Some("stripe".to_string()),
        }
    }

    #[tokio::test]
    async fn test_place_order_creates_one_order_and_completes_cart() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;

        let placed = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap();

        let orders = f.db.orders();
        assert_eq!(orders.len(), 1);
        let order = &placed.order;
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.payment_provider, Some(ProviderKind::Stripe));
        assert_eq!(order.payment_intent_id.as_deref(), Some("stripe_intent_1"));
        assert_eq!(order.payment_id.as_deref(), Some("stripe_intent_1_payment"));
        assert_eq!(order.subtotal, Decimal::new(4800, 2));
        assert_eq!(order.shipping, Decimal::new(595, 2));
        assert_eq!(order.total, order.subtotal + order.shipping + order.tax);
        assert_eq!(order.items.len(), 1);
        assert!(order.order_number.starts_with("ORD-"));

        assert_eq!(f.db.cart(session.cart_id).unwrap().status, CartStatus::Completed);
        let session = f.checkout.get(session.id).await.unwrap();
        assert_eq!(session.step, CheckoutStep::Confirmation);
        assert_eq!(session.order_id, Some(order.id));
        assert_eq!(
            f.provider.calls().last().map(String::as_str),
            Some("verify:stripe_intent_1")
        );
    }

    #[tokio::test]
    async fn test_second_placement_conflicts() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        f.orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap();

        assert!(matches!(
            f.orders.place_order(paid_request(&session, &intent)).await,
            Err(OrderError::AlreadyPlaced)
        ));
        assert_eq!(f.db.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_creates_nothing() {
        let f = Fixture::new();
        let request = PlaceOrder {
            session_id: CheckoutSessionId::new(),
            payment_intent_id: None,
            payment_method_id: None,
            payment_provider: None,
        };
        assert!(matches!(
            f.orders.place_order(request).await,
            Err(OrderError::SessionNotFound)
        ));
        assert!(f.db.orders().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_payment_is_pending() {
        let f = Fixture::new();
        let session = f.session().await;
        let placed = f
            .orders
            .place_order(PlaceOrder {
                session_id: session.id,
                payment_intent_id: None,
                payment_method_id: None,
                payment_provider: None,
            })
            .await
            .unwrap();

        assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
        assert_eq!(placed.order.status, OrderStatus::Pending);
        assert!(placed.order.payment_provider.is_none());
        assert!(placed.payment.is_none());
        assert!(f.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unverified_payment_creates_nothing() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        f.provider.set_status(PaymentStatus::Failed);

        let err = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::PaymentNotVerified(_)));
        assert!(f.db.orders().is_empty());
        assert_eq!(f.db.cart(session.cart_id).unwrap().status, CartStatus::Checkout);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_order() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        f.db.fail_once(FailPoint::CartCompletion);

        let err = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap_err();
        let OrderError::Incomplete { order_id, step, .. } = err else {
            panic!("expected Incomplete, got {err:?}");
        };
        assert_eq!(step, "cart completion");
        assert_eq!(f.db.orders().first().unwrap().id, order_id);
        assert_ne!(f.db.cart(session.cart_id).unwrap().status, CartStatus::Completed);
    }

    #[tokio::test]
    async fn test_admin_status_updates_are_guarded() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        let placed = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap();

        let order = f.orders.update_status(placed.order.id, "shipped").await.unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        assert!(matches!(
            f.orders.update_status(placed.order.id, "lost").await,
            Err(OrderError::InvalidStatus(_))
        ));
        assert!(matches!(
            f.orders.update_payment_status(OrderId::new(), "paid").await,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_refund_and_failed_capture() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        let placed = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap();

        f.provider.fail_next("Charge already captured");
        let err = f.orders.capture_payment(placed.order.id).await.unwrap_err();
        assert!(matches!(err, OrderError::Payment(ref m) if m.contains("already captured")));

        let (order, result) = f
            .orders
            .refund_payment(placed.order.id, None, Some("requested_by_customer"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(order.status, OrderStatus::Refunded);
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert!(
            f.provider
                .calls()
                .contains(&"refund:stripe_intent_1_payment".to_string())
        );
    }

    #[tokio::test]
    async fn test_webhook_moves_pending_order() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        f.provider.set_status(PaymentStatus::Processing);
        let placed = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap();
        assert_eq!(placed.order.status, OrderStatus::Processing);

        let update = WebhookUpdate {
            provider: ProviderKind::Stripe,
            reference: intent.clone(),
            payment_id: None,
            status: PaymentStatus::Paid,
            event_type: "payment_intent.succeeded".to_string(),
        };
        let order = f.orders.apply_webhook_update(&update).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_status, PaymentStatus::Paid);

        let stray = WebhookUpdate {
            reference: "pi_unknown".to_string(),
            ..update
        };
        assert!(f.orders.apply_webhook_update(&stray).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_intent_is_rejected() {
        let f = Fixture::new();
        let (session, _) = f.paid_session().await;

        let err = f
            .orders
            .place_order(paid_request(&session, "pi_someone_elses"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::PaymentMismatch(_)), "{err:?}");
        assert!(f.db.orders().is_empty());
        assert!(!f.provider.calls().iter().any(|c| c.starts_with("verify:")));
    }

    #[tokio::test]
    async fn test_intent_required_to_be_attached() {
        let f = Fixture::new();
        let session = f.session().await;

        let err = f
            .orders
            .place_order(paid_request(&session, "stripe_intent_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::PaymentMismatch(_)));
        assert!(f.db.orders().is_empty());
    }

    #[tokio::test]
    async fn test_one_intent_cannot_pay_for_two_checkouts() {
        let f = Fixture::new();
        let (first, intent) = f.paid_session().await;
        f.orders
            .place_order(paid_request(&first, &intent))
            .await
            .unwrap();

        let second = f.session().await;
        f.start_payment(&second).await;
        let err = f
            .orders
            .place_order(paid_request(&second, &intent))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::PaymentMismatch(_)));
        assert_eq!(f.db.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_requested_provider_must_match_attached_one() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        let mut request = paid_request(&session, &intent);
        request.payment_provider = Some("square".to_string());

        let err = f.orders.place_order(request).await.unwrap_err();
        assert!(matches!(err, OrderError::PaymentMismatch(ref m) if m.contains("stripe")));
    }

    #[tokio::test]
    async fn test_cart_growing_after_intent_is_rejected() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        let cart = f.carts.get(session.cart_id).await.unwrap();
        let line = cart.items.first().unwrap();
        f.carts
            .update_item_quantity(cart.id, line.id, 5)
            .await
            .unwrap();

        let err = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap_err();
        let OrderError::PaymentMismatch(message) = err else {
            panic!("expected PaymentMismatch, got {err:?}");
        };
        assert!(message.contains("53.95"), "{message}");
        assert!(f.db.orders().is_empty());
        assert_eq!(f.db.cart(session.cart_id).unwrap().status, CartStatus::Checkout);
    }

    #[tokio::test]
    async fn test_verified_amount_must_match_total() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        f.provider
            .set_amount(Price::new(Decimal::new(100, 2), CurrencyCode::USD));

        assert!(matches!(
            f.orders.place_order(paid_request(&session, &intent)).await,
            Err(OrderError::PaymentMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert_reports_already_placed() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        f.orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap();

        // A concurrent placement that passed the status checks before the
        // first one completed still hits the per-session uniqueness.
        let session = f.checkout.get(session.id).await.unwrap();
        let err = f
            .orders
            .create_order_from_checkout(
                &session,
                Some(intent.as_str()),
                None,
                Some(ProviderKind::Stripe),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::AlreadyPlaced), "{err:?}");
        assert_eq!(f.db.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_above_total_is_rejected() {
        let f = Fixture::new();
        let (session, intent) = f.paid_session().await;
        let placed = f
            .orders
            .place_order(paid_request(&session, &intent))
            .await
            .unwrap();

        let err = f
            .orders
            .refund_payment(placed.order.id, Some(Decimal::new(100_000, 2)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::RefundExceedsTotal { .. }));
        assert!(!f.provider.calls().iter().any(|c| c.starts_with("refund:")));
        let order = f.orders.get(placed.order.id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);

        let (order, _) = f
            .orders
            .refund_payment(placed.order.id, Some(order.total), None)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);
    }
}
