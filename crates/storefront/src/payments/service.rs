//! Provider registry and the uniform-result facade used by route handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use meridian_core::{PaymentStatus, Price, ProviderKind};

use super::square::SquareProvider;
use super::stripe::StripeProvider;
use super::{
    OrderMeta, PaymentDetails, PaymentError, PaymentIntent, PaymentProvider, PaymentResult,
    ProviderPayment, WebhookUpdate,
};
use crate::config::PaymentsConfig;

/// Public metadata about a configured provider, safe to send to browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub display_name: &'static str,
    /// `sandbox`/`production` for Square, `test`/`live` for Stripe.
    pub environment: String,
    /// Square Web Payments SDK application id.
    pub application_id: Option<String>,
    /// Square location id.
    pub location_id: Option<String>,
    /// Stripe publishable key.
    pub publishable_key: Option<String>,
    pub is_default: bool,
}

/// A payment method the checkout page can offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodDescriptor {
    /// Method type sent back as `type` when processing.
    pub id: &'static str,
    pub name: &'static str,
    pub provider: ProviderKind,
}

/// Every method the store knows how to offer, by provider.
const PAYMENT_METHODS: &[PaymentMethodDescriptor] = &[
    PaymentMethodDescriptor {
        id: "card",
        name: "Credit or debit card",
        provider: ProviderKind::Square,
    },
    PaymentMethodDescriptor {
        id: "apple_pay",
        name: "Apple Pay",
        provider: ProviderKind::Square,
    },
    PaymentMethodDescriptor {
        id: "google_pay",
        name: "Google Pay",
        provider: ProviderKind::Square,
    },
    PaymentMethodDescriptor {
        id: "cash_app_pay",
        name: "Cash App Pay",
        provider: ProviderKind::Square,
    },
    PaymentMethodDescriptor {
        id: "card",
        name: "Credit or debit card",
        provider: ProviderKind::Stripe,
    },
    PaymentMethodDescriptor {
        id: "link",
        name: "Link",
        provider: ProviderKind::Stripe,
    },
];

/// Registry of initialized providers.
///
/// Cheap to clone; providers are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct PaymentService {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
    default_provider: Option<ProviderKind>,
}

impl PaymentService {
    /// Initialize every configured provider.
    ///
    /// A provider whose initialization fails is logged and left out of the
    /// registry; the store keeps running with the others.
    #[must_use]
    pub fn from_config(config: &PaymentsConfig) -> Self {
        let mut service = Self::default();

        if let Some(square) = &config.square {
            match SquareProvider::initialize(square) {
                Ok(provider) => service.register(Arc::new(provider)),
                Err(e) => tracing::error!(error = %e, "Square provider failed to initialize"),
            }
        }
        if let Some(stripe) = &config.stripe {
            match StripeProvider::initialize(stripe) {
                Ok(provider) => service.register(Arc::new(provider)),
                Err(e) => tracing::error!(error = %e, "Stripe provider failed to initialize"),
            }
        }

        service.default_provider = config
            .effective_default()
            .filter(|kind| service.providers.contains_key(kind))
            .or_else(|| service.providers.keys().copied().min_by_key(|k| k.as_str()));

        tracing::info!(
            providers = ?service.providers.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            default = ?service.default_provider,
            "Payment providers ready"
        );
        service
    }

    /// Add a provider, replacing any existing one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        let kind = provider.kind();
        self.providers.insert(kind, provider);
        if self.default_provider.is_none() {
            self.default_provider = Some(kind);
        }
    }

    /// Change the default provider. Ignored if `kind` is not registered.
    pub fn set_default(&mut self, kind: ProviderKind) {
        if self.providers.contains_key(&kind) {
            self.default_provider = Some(kind);
        }
    }

    /// Whether any provider is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The provider used when a request names none.
    #[must_use]
    pub const fn default_provider(&self) -> Option<ProviderKind> {
        self.default_provider
    }

    /// Descriptors for configured providers, default first.
    #[must_use]
    pub fn available_providers(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<ProviderDescriptor> = self
            .providers
            .values()
            .map(|provider| {
                let mut descriptor = provider.descriptor();
                descriptor.is_default = Some(descriptor.kind) == self.default_provider;
                descriptor
            })
            .collect();
        descriptors.sort_by_key(|d| (!d.is_default, d.kind.as_str()));
        descriptors
    }

    /// Whether `id` is a payment method type the store knows, configured or not.
    #[must_use]
    pub fn is_known_method(id: &str) -> bool {
        PAYMENT_METHODS.iter().any(|method| method.id == id)
    }

    /// Payment methods offered by configured providers.
    #[must_use]
    pub fn payment_methods(&self) -> Vec<PaymentMethodDescriptor> {
        PAYMENT_METHODS
            .iter()
            .filter(|method| self.providers.contains_key(&method.provider))
            .cloned()
            .collect()
    }

    /// Resolve a provider by name, falling back to the default.
    ///
    /// # Errors
    ///
    /// `Unsupported` if the name is not a known provider, `NotConfigured` if it
    /// is known but not registered (or no name was given and there is no
    /// default).
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        let kind = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name
                .to_ascii_lowercase()
                .parse::<ProviderKind>()
                .map_err(|_| PaymentError::Unsupported(name.to_string()))?,
            None => self
                .default_provider
                .ok_or_else(|| PaymentError::NotConfigured("default".to_string()))?,
        };

        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| PaymentError::NotConfigured(kind.to_string()))
    }

    /// Create a payment intent with the named (or default) provider.
    ///
    /// Unlike the other operations this returns a `Result`: there is no
    /// payment yet to describe with a [`PaymentResult`].
    ///
    /// # Errors
    ///
    /// Returns the resolution or vendor error.
    #[instrument(skip(self, meta), fields(reference = %meta.reference_id))]
    pub async fn create_payment(
        &self,
        provider: Option<&str>,
        amount: Price,
        meta: &OrderMeta,
    ) -> Result<PaymentIntent, PaymentError> {
        let provider = self.resolve(provider)?;
        provider.create_payment(amount, meta).await
    }

    /// Charge an intent. Fails unless the resulting status is neither
    /// `failed` nor `cancelled`.
    #[instrument(skip(self, details), fields(provider = ?details.provider))]
    pub async fn process_payment(
        &self,
        payment_intent_id: &str,
        details: &PaymentDetails,
    ) -> PaymentResult {
        let outcome = match self.resolve(details.provider.as_deref()) {
            Ok(provider) => provider.process_payment(payment_intent_id, details).await,
            Err(e) => Err(e),
        };
        to_result(outcome, |status| {
            !matches!(status, PaymentStatus::Failed | PaymentStatus::Cancelled)
        })
    }

    /// Re-query the vendor. Succeeds only for `paid` or `processing`.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        payment_intent_id: &str,
        provider: Option<&str>,
    ) -> PaymentResult {
        let outcome = match self.resolve(provider) {
            Ok(provider) => provider.verify_payment(payment_intent_id).await,
            Err(e) => Err(e),
        };
        to_result(outcome, PaymentStatus::is_successful)
    }

    /// Capture an authorized payment. Succeeds when it ends up `paid`.
    #[instrument(skip(self))]
    pub async fn capture_payment(&self, payment_id: &str, provider: Option<&str>) -> PaymentResult {
        let outcome = match self.resolve(provider) {
            Ok(provider) => provider.capture_payment(payment_id).await,
            Err(e) => Err(e),
        };
        to_result(outcome, |status| status == PaymentStatus::Paid)
    }

    /// Void a payment. Succeeds when it ends up `cancelled`.
    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, payment_id: &str, provider: Option<&str>) -> PaymentResult {
        let outcome = match self.resolve(provider) {
            Ok(provider) => provider.cancel_payment(payment_id).await,
            Err(e) => Err(e),
        };
        to_result(outcome, |status| status == PaymentStatus::Cancelled)
    }

    /// Refund all of a payment, or `amount` of it.
    #[instrument(skip(self))]
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        provider: Option<&str>,
        amount: Option<Price>,
        reason: Option<&str>,
    ) -> PaymentResult {
        let outcome = match self.resolve(provider) {
            Ok(provider) => provider.refund_payment(payment_id, amount, reason).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(refund) => {
                let success = refund.status == PaymentStatus::Refunded;
                PaymentResult {
                    success,
                    payment_id: Some(refund.payment_id),
                    status: Some(refund.status),
                    amount: refund.amount,
                    error: (!success).then(|| format!("Refund status is {}", refund.vendor_status)),
                }
            }
            Err(e) => failure(&e),
        }
    }

    /// Verify and parse a webhook for the named provider.
    ///
    /// # Errors
    ///
    /// Returns the resolution error, `InvalidSignature`, or a parse error.
    pub fn parse_webhook(
        &self,
        provider: &str,
        headers: &reqwest::header::HeaderMap,
        body: &[u8],
    ) -> Result<Option<WebhookUpdate>, PaymentError> {
        self.resolve(Some(provider))?.parse_webhook(headers, body)
    }
}

fn failure(error: &PaymentError) -> PaymentResult {
    if error.is_upstream_failure() {
        tracing::error!(error = %error, "Payment provider unavailable");
    } else {
        tracing::warn!(error = %error, "Payment operation failed");
    }
    PaymentResult::failure(error.to_string())
}

fn to_result(
    outcome: Result<ProviderPayment, PaymentError>,
    accept: fn(PaymentStatus) -> bool,
) -> PaymentResult {
    match outcome {
        Ok(payment) => PaymentResult::from_payment(&payment, accept),
        Err(e) => failure(&e),
    }
}
