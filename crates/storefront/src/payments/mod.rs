//! Payment provider abstraction.
//!
//! # Architecture
//!
//! - [`PaymentProvider`] is implemented once per vendor ([`square`], [`stripe`])
//!   over the vendor's REST API with `reqwest`
//! - [`PaymentService`] holds a registry of initialized providers keyed by
//!   [`ProviderKind`] and turns every outcome into the uniform
//!   [`PaymentResult`] shape
//! - Vendor statuses are normalized to [`PaymentStatus`] inside each adapter
//! - Webhook signatures are verified per vendor in [`webhook`]
//!
//! There are no retries and no idempotency ledger: one vendor call chain per
//! invocation.

pub mod service;
pub mod square;
pub mod stripe;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use meridian_core::{PaymentStatus, Price, ProviderKind};

pub use service::{PaymentMethodDescriptor, PaymentService, ProviderDescriptor};

/// Timeout applied to every vendor request.
pub const VENDOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from payment providers.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The provider name parsed but no provider of that kind is registered.
    #[error("Payment provider '{0}' is not configured")]
    NotConfigured(String),

    /// The provider name is not one the store knows about.
    #[error("Unsupported payment provider '{0}'")]
    Unsupported(String),

    /// Credentials or settings are missing or malformed.
    #[error("invalid {provider} configuration: {message}")]
    Configuration {
        provider: ProviderKind,
        message: String,
    },

    /// The request cannot be sent as given (bad amount, missing id).
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),

    /// The vendor rejected the request (declines, validation, not found).
    #[error("{message}")]
    Api {
        provider: ProviderKind,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The vendor could not be reached.
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },

    /// The vendor answered with something we could not interpret.
    #[error("unexpected {provider} response: {message}")]
    UnexpectedResponse {
        provider: ProviderKind,
        message: String,
    },

    /// Webhook signature missing, malformed or wrong.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),
}

impl PaymentError {
    /// Whether the vendor itself was unreachable or incoherent, as opposed to
    /// rejecting the request.
    #[must_use]
    pub const fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::UnexpectedResponse { .. }
        )
    }
}

/// A line item forwarded to the vendor for display on receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaLineItem {
    pub name: String,
    pub quantity: i32,
    pub unit_price: Price,
}

/// Order context sent along with a payment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMeta {
    /// Our reference (the checkout session id).
    pub reference_id: String,
    pub email: Option<String>,
    pub description: Option<String>,
    pub line_items: Vec<MetaLineItem>,
}

/// A created payment intent, handed to the browser SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Stripe PaymentIntent id, or Square order id.
    pub payment_intent_id: String,
    /// Stripe client secret, or `"{location_id}:{order_id}"` for Square.
    pub client_secret: String,
    pub provider: ProviderKind,
    pub amount: Price,
}

/// Billing details collected by the payment form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(email, length(max = 254))]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub line1: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 100))]
    pub city: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub region: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 20))]
    pub postal_code: Option<String>,
    /// ISO 3166-1 alpha-2.
    #[serde(default)]
    #[validate(length(equal = 2))]
    pub country: Option<String>,
}

/// Details for processing a payment against an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDetails {
    /// Card nonce / token / payment method id from the browser SDK.
    pub payment_method_id: String,
    /// Requested provider name, resolved by the service.
    pub provider: Option<String>,
    /// Method type (`card`, `apple_pay`, ...).
    pub method_type: String,
    pub customer_id: Option<String>,
    pub billing_info: Option<BillingInfo>,
    pub save_payment_method: bool,
}

/// A vendor payment, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPayment {
    /// Vendor payment id (Square payment, Stripe PaymentIntent).
    pub id: String,
    pub status: PaymentStatus,
    /// The vendor's own status string, for logs.
    pub vendor_status: String,
    pub amount: Option<Price>,
}

/// A vendor refund, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRefund {
    pub id: String,
    pub payment_id: String,
    /// `Refunded` when accepted (pending or completed), `Failed` otherwise.
    pub status: PaymentStatus,
    pub vendor_status: String,
    pub amount: Option<Price>,
}

/// A payment status change announced by a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookUpdate {
    pub provider: ProviderKind,
    /// Intent id (Stripe PaymentIntent, Square order) used to find the order.
    pub reference: String,
    pub payment_id: Option<String>,
    pub status: PaymentStatus,
    pub event_type: String,
}

/// The uniform result every payment operation resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    pub payment_id: Option<String>,
    pub status: Option<PaymentStatus>,
    /// Amount the vendor reports for the payment, when it reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Price>,
    pub error: Option<String>,
}

impl PaymentResult {
    /// A failed result carrying only an error message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payment_id: None,
            status: None,
            amount: None,
            error: Some(error.into()),
        }
    }

    /// A result for `payment`, successful iff `accept(status)`.
    #[must_use]
    pub fn from_payment(payment: &ProviderPayment, accept: fn(PaymentStatus) -> bool) -> Self {
        let success = accept(payment.status);
        Self {
            success,
            payment_id: Some(payment.id.clone()),
            status: Some(payment.status),
            amount: payment.amount,
            error: (!success).then(|| format!("Payment status is {}", payment.status)),
        }
    }
}

/// One payment vendor.
///
/// Implementations are constructed (and their credentials validated) by an
/// `initialize` associated function; the trait only covers runtime calls.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Which vendor this is.
    fn kind(&self) -> ProviderKind;

    /// Public metadata for client display. Never includes secrets.
    fn descriptor(&self) -> ProviderDescriptor;

    /// Create an intent (Stripe PaymentIntent, Square order) for `amount`.
    async fn create_payment(
        &self,
        amount: Price,
        meta: &OrderMeta,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Charge the intent with the payment method from the browser.
    async fn process_payment(
        &self,
        payment_intent_id: &str,
        details: &PaymentDetails,
    ) -> Result<ProviderPayment, PaymentError>;

    /// Re-query the vendor for the current status of an intent.
    async fn verify_payment(&self, payment_intent_id: &str)
    -> Result<ProviderPayment, PaymentError>;

    /// Fetch a payment by vendor id.
    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError>;

    /// Capture an authorized payment.
    async fn capture_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError>;

    /// Void an authorized payment.
    async fn cancel_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError>;

    /// Refund all of a payment, or `amount` of it.
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Price>,
        reason: Option<&str>,
    ) -> Result<ProviderRefund, PaymentError>;

    /// Verify a webhook delivery and extract the status change it carries.
    ///
    /// Returns `Ok(None)` for well-signed events this store does not act on.
    fn parse_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<WebhookUpdate>, PaymentError>;
}

/// Build the HTTP client shared by a provider's calls.
pub(crate) fn vendor_client(
    provider: ProviderKind,
    headers: HeaderMap,
) -> Result<reqwest::Client, PaymentError> {
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(VENDOR_TIMEOUT)
        .user_agent(concat!("meridian-storefront/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| PaymentError::Transport { provider, source })
}

/// Truncate a vendor body for logging.
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(500).collect()
}

#[cfg(test)]
mod tests {
    use meridian_core::CurrencyCode;

    use super::*;

    fn payment(status: PaymentStatus) -> ProviderPayment {
        ProviderPayment {
            id: "pay_1".to_string(),
            status,
            vendor_status: "x".to_string(),
            amount: Some(Price::from_minor_units(1000, CurrencyCode::USD)),
        }
    }

    #[test]
    fn test_result_from_payment() {
        let ok = PaymentResult::from_payment(&payment(PaymentStatus::Paid), PaymentStatus::is_successful);
        assert!(ok.success);
        assert_eq!(ok.payment_id.as_deref(), Some("pay_1"));
        assert_eq!(ok.amount, Some(Price::from_minor_units(1000, CurrencyCode::USD)));
        assert!(ok.error.is_none());

        let pending =
            PaymentResult::from_payment(&payment(PaymentStatus::Pending), PaymentStatus::is_successful);
        assert!(!pending.success);
        assert_eq!(pending.error.as_deref(), Some("Payment status is pending"));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let json = serde_json::to_value(PaymentResult::failure("nope")).unwrap_or_default();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "nope");
        assert!(json.get("paymentId").is_some());
        assert!(json.get("amount").is_none());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PaymentError::NotConfigured("stripe".to_string()).to_string(),
            "Payment provider 'stripe' is not configured"
        );
        assert_eq!(
            PaymentError::Unsupported("paypal".to_string()).to_string(),
            "Unsupported payment provider 'paypal'"
        );
    }
}
