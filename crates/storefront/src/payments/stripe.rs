//! Stripe adapter over the Stripe REST API (`/v1`, form-encoded).
//!
//! The intent is a `PaymentIntent` with automatic capture and automatic
//! payment methods (redirect-based methods disabled, since confirmation
//! happens server-side).

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use meridian_core::{CurrencyCode, PaymentStatus, Price, ProviderKind};

use super::webhook::{STRIPE_SIGNATURE_HEADER, required_header, verify_stripe_signature};
use super::{
    OrderMeta, PaymentDetails, PaymentError, PaymentIntent, PaymentProvider, ProviderDescriptor,
    ProviderPayment, ProviderRefund, WebhookUpdate, snippet, vendor_client,
};
use crate::config::StripeConfig;

/// Stripe API base URL.
const BASE_URL: &str = "https://api.stripe.com";

/// Stripe API version sent with every request.
pub const STRIPE_VERSION: &str = "2024-06-20";

const KIND: ProviderKind = ProviderKind::Stripe;

/// Map a PaymentIntent status to ours.
#[must_use]
pub fn map_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "succeeded" => Some(PaymentStatus::Paid),
        "processing" | "requires_capture" => Some(PaymentStatus::Processing),
        "requires_payment_method" | "requires_confirmation" | "requires_action" => {
            Some(PaymentStatus::Pending)
        }
        "canceled" => Some(PaymentStatus::Cancelled),
        _ => None,
    }
}

fn map_refund_status(status: &str) -> PaymentStatus {
    match status {
        "pending" | "succeeded" | "requires_action" => PaymentStatus::Refunded,
        _ => PaymentStatus::Failed,
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    client_secret: Option<String>,
}

impl StripePaymentIntent {
    fn price(&self) -> Result<Price, PaymentError> {
        let currency: CurrencyCode =
            self.currency
                .to_ascii_uppercase()
                .parse()
                .map_err(|e: String| PaymentError::UnexpectedResponse {
                    provider: KIND,
                    message: e,
                })?;
        Ok(Price::from_minor_units(self.amount, currency))
    }

    fn normalize(self) -> Result<ProviderPayment, PaymentError> {
        let status = map_status(&self.status).ok_or_else(|| PaymentError::UnexpectedResponse {
            provider: KIND,
            message: format!("unknown payment intent status {}", self.status),
        })?;
        let amount = self.price()?;
        Ok(ProviderPayment {
            id: self.id,
            status,
            vendor_status: self.status,
            amount: Some(amount),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: serde_json::Value,
}

// =============================================================================
// Provider
// =============================================================================

/// Stripe payment provider.
pub struct StripeProvider {
    client: reqwest::Client,
    base_url: String,
    live: bool,
    publishable_key: Option<String>,
    webhook_secret: Option<SecretString>,
}

impl StripeProvider {
    /// Validate credentials and build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the secret key is not a secret (`sk_`) or
    /// restricted (`rk_`) key, or if the publishable key is set but is not a
    /// `pk_` key.
    pub fn initialize(config: &StripeConfig) -> Result<Self, PaymentError> {
        let key = config.secret_key.expose_secret().trim();
        if !(key.starts_with("sk_") || key.starts_with("rk_")) {
            return Err(configuration("secret key must start with sk_ or rk_"));
        }
        if config
            .publishable_key
            .as_deref()
            .is_some_and(|pk| !pk.starts_with("pk_"))
        {
            return Err(configuration("publishable key must start with pk_"));
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| configuration("secret key is not a valid header value"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert("Stripe-Version", HeaderValue::from_static(STRIPE_VERSION));

        let base_url = config
            .base_url_override
            .as_deref()
            .unwrap_or(BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: vendor_client(KIND, headers)?,
            base_url,
            live: key.contains("_live_"),
            publishable_key: config.publishable_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PaymentError> {
        let response = request
            .send()
            .await
            .map_err(|source| PaymentError::Transport {
                provider: KIND,
                source,
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| PaymentError::Transport {
                provider: KIND,
                source,
            })?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(body = %snippet(&body), "Unparseable Stripe response");
            PaymentError::UnexpectedResponse {
                provider: KIND,
                message: e.to_string(),
            }
        })
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<StripePaymentIntent, PaymentError> {
        self.send(self.client.post(self.url(path)).form(form)).await
    }
}

fn configuration(message: &str) -> PaymentError {
    PaymentError::Configuration {
        provider: KIND,
        message: message.to_string(),
    }
}

fn api_error(status: u16, body: &str) -> PaymentError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => {
            tracing::debug!(
                status,
                error_type = error.error_type.as_deref().unwrap_or_default(),
                decline_code = error.decline_code.as_deref().unwrap_or_default(),
                "Stripe API error"
            );
            PaymentError::Api {
                provider: KIND,
                status,
                message: error
                    .message
                    .unwrap_or_else(|| format!("Stripe returned HTTP {status}")),
                code: error.code.or(error.decline_code),
            }
        }
        Err(_) => PaymentError::Api {
            provider: KIND,
            status,
            code: None,
            message: format!("Stripe returned HTTP {status}"),
        },
    }
}

fn minor_units(price: Price) -> Result<i64, PaymentError> {
    price
        .to_minor_units()
        .filter(|amount| *amount > 0)
        .ok_or_else(|| PaymentError::InvalidRequest(format!("amount must be positive, got {price}")))
}

/// Pull the fields a webhook update needs out of an event object.
fn webhook_update(event: &WebhookEvent) -> Option<WebhookUpdate> {
    let object = &event.data.object;
    let field = |name: &str| object.get(name).and_then(serde_json::Value::as_str);

    match event.event_type.as_str() {
        "payment_intent.succeeded"
        | "payment_intent.processing"
        | "payment_intent.amount_capturable_updated"
        | "payment_intent.canceled"
        | "payment_intent.payment_failed" => {
            let status = if event.event_type == "payment_intent.payment_failed" {
                PaymentStatus::Failed
            } else {
                map_status(field("status")?)?
            };
            let id = field("id")?.to_string();
            Some(WebhookUpdate {
                provider: KIND,
                payment_id: Some(id.clone()),
                reference: id,
                status,
                event_type: event.event_type.clone(),
            })
        }
        "charge.refunded" => {
            let intent = field("payment_intent")?.to_string();
            Some(WebhookUpdate {
                provider: KIND,
                payment_id: Some(intent.clone()),
                reference: intent,
                status: PaymentStatus::Refunded,
                event_type: event.event_type.clone(),
            })
        }
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: KIND,
            display_name: "Stripe",
            environment: if self.live { "live" } else { "test" }.to_string(),
            application_id: None,
            location_id: None,
            publishable_key: self.publishable_key.clone(),
            is_default: false,
        }
    }

    #[instrument(skip(self, meta), fields(reference = %meta.reference_id, amount = %amount))]
    async fn create_payment(
        &self,
        amount: Price,
        meta: &OrderMeta,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut form = vec![
            ("amount", minor_units(amount)?.to_string()),
            ("currency", amount.currency_code.code().to_ascii_lowercase()),
            ("capture_method", "automatic".to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("automatic_payment_methods[allow_redirects]", "never".to_string()),
            ("metadata[reference_id]", meta.reference_id.clone()),
        ];
        if let Some(email) = &meta.email {
            form.push(("receipt_email", email.clone()));
        }
        if let Some(description) = &meta.description {
            form.push(("description", description.clone()));
        }

        let intent = self.post_form("/v1/payment_intents", &form).await?;
        tracing::info!(payment_intent_id = %intent.id, "Created Stripe payment intent");

        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            PaymentError::UnexpectedResponse {
                provider: KIND,
                message: "payment intent has no client secret".to_string(),
            }
        })?;
        Ok(PaymentIntent {
            amount: intent.price()?,
            payment_intent_id: intent.id,
            client_secret,
            provider: KIND,
        })
    }

    #[instrument(skip(self, details), fields(method = %details.method_type))]
    async fn process_payment(
        &self,
        payment_intent_id: &str,
        details: &PaymentDetails,
    ) -> Result<ProviderPayment, PaymentError> {
        let mut form = vec![("payment_method", details.payment_method_id.clone())];
        if details.save_payment_method {
            form.push(("setup_future_usage", "off_session".to_string()));
        }
        if let Some(customer) = &details.customer_id {
            form.push(("customer", customer.clone()));
        }
        if let Some(email) = details.billing_info.as_ref().and_then(|b| b.email.clone()) {
            form.push(("receipt_email", email));
        }

        let intent = self
            .post_form(&format!("/v1/payment_intents/{payment_intent_id}/confirm"), &form)
            .await?;
        let payment = intent.normalize()?;
        tracing::info!(payment_id = %payment.id, status = %payment.status, "Confirmed Stripe payment intent");
        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn verify_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<ProviderPayment, PaymentError> {
        self.get_payment(payment_intent_id).await
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        let intent: StripePaymentIntent = self
            .send(
                self.client
                    .get(self.url(&format!("/v1/payment_intents/{payment_id}"))),
            )
            .await?;
        intent.normalize()
    }

    #[instrument(skip(self))]
    async fn capture_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        self.post_form(&format!("/v1/payment_intents/{payment_id}/capture"), &[])
            .await?
            .normalize()
    }

    #[instrument(skip(self))]
    async fn cancel_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        self.post_form(&format!("/v1/payment_intents/{payment_id}/cancel"), &[])
            .await?
            .normalize()
    }

    #[instrument(skip(self))]
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Price>,
        reason: Option<&str>,
    ) -> Result<ProviderRefund, PaymentError> {
        let mut form = vec![("payment_intent", payment_id.to_string())];
        if let Some(amount) = amount {
            form.push(("amount", minor_units(amount)?.to_string()));
        }
        if let Some(reason) = reason {
            // Stripe only accepts its own reason codes; free text goes to metadata.
            match reason {
                "duplicate" | "fraudulent" | "requested_by_customer" => {
                    form.push(("reason", reason.to_string()));
                }
                _ => form.push(("metadata[reason]", reason.to_string())),
            }
        }

        let refund: StripeRefund = self
            .send(self.client.post(self.url("/v1/refunds")).form(&form))
            .await?;
        let currency: Option<CurrencyCode> = refund.currency.to_ascii_uppercase().parse().ok();

        Ok(ProviderRefund {
            status: map_refund_status(&refund.status),
            amount: currency.map(|c| Price::from_minor_units(refund.amount, c)),
            payment_id: refund
                .payment_intent
                .unwrap_or_else(|| payment_id.to_string()),
            id: refund.id,
            vendor_status: refund.status,
        })
    }

    fn parse_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<WebhookUpdate>, PaymentError> {
        let Some(secret) = &self.webhook_secret else {
            return Err(configuration("webhook secret is not configured"));
        };
        let header = required_header(headers, STRIPE_SIGNATURE_HEADER)?;
        verify_stripe_signature(
            header,
            body,
            secret.expose_secret(),
            chrono::Utc::now().timestamp(),
        )?;

        let event: WebhookEvent =
            serde_json::from_slice(body).map_err(|e| PaymentError::UnexpectedResponse {
                provider: KIND,
                message: format!("webhook body: {e}"),
            })?;

        let update = webhook_update(&event);
        if update.is_none() {
            tracing::debug!(event_type = %event.event_type, "Ignoring Stripe webhook event");
        }
        Ok(update)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::payments::webhook::tests::stripe_header;

    const WEBHOOK_SECRET: &str = "whsec_Fq3Zr8Kp1Ym6Tx2Vn9";

    fn config(base_url: &str) -> StripeConfig {
        StripeConfig {
            secret_key: SecretString::from("sk_test_51Hx"),
            publishable_key: Some("pk_test_51Hx".to_string()),
            webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
            base_url_override: Some(base_url.to_string()),
        }
    }

    fn usd(minor: i64) -> Price {
        Price::from_minor_units(minor, CurrencyCode::USD)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("succeeded"), Some(PaymentStatus::Paid));
        assert_eq!(map_status("processing"), Some(PaymentStatus::Processing));
        assert_eq!(map_status("requires_capture"), Some(PaymentStatus::Processing));
        assert_eq!(map_status("requires_payment_method"), Some(PaymentStatus::Pending));
        assert_eq!(map_status("requires_confirmation"), Some(PaymentStatus::Pending));
        assert_eq!(map_status("requires_action"), Some(PaymentStatus::Pending));
        assert_eq!(map_status("canceled"), Some(PaymentStatus::Cancelled));
        assert_eq!(map_status("SUCCEEDED"), None);
    }

    #[test]
    fn test_initialize_checks_key_prefixes() {
        let mut cfg = config("http://localhost");
        cfg.secret_key = SecretString::from("pk_test_oops");
        assert!(matches!(
            StripeProvider::initialize(&cfg),
            Err(PaymentError::Configuration { .. })
        ));

        let mut cfg = config("http://localhost");
        cfg.publishable_key = Some("sk_test_oops".to_string());
        assert!(StripeProvider::initialize(&cfg).is_err());

        let mut cfg = config("http://localhost");
        cfg.secret_key = SecretString::from("rk_live_abc");
        let provider = StripeProvider::initialize(&cfg).unwrap();
        assert_eq!(provider.descriptor().environment, "live");
    }

    #[tokio::test]
    async fn test_create_payment_posts_form() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/v1/payment_intents")
            .match_header("authorization", "Bearer sk_test_51Hx")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("amount".into(), "4700".into()),
                mockito::Matcher::UrlEncoded("currency".into(), "usd".into()),
                mockito::Matcher::UrlEncoded(
                    "automatic_payment_methods[enabled]".into(),
                    "true".into(),
                ),
                mockito::Matcher::UrlEncoded("metadata[reference_id]".into(), "chk_1".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"id":"pi_1","status":"requires_payment_method","amount":4700,"currency":"usd","client_secret":"pi_1_secret_x"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let provider = StripeProvider::initialize(&config(&server.url())).unwrap();
        let meta = OrderMeta {
            reference_id: "chk_1".to_string(),
            ..OrderMeta::default()
        };
        let intent = provider.create_payment(usd(4700), &meta).await.unwrap();

        create.assert_async().await;
        assert_eq!(intent.payment_intent_id, "pi_1");
        assert_eq!(intent.client_secret, "pi_1_secret_x");
        assert_eq!(intent.amount, usd(4700));
    }

    #[tokio::test]
    async fn test_process_payment_saves_method_when_asked() {
        let mut server = mockito::Server::new_async().await;
        let confirm = server
            .mock("POST", "/v1/payment_intents/pi_1/confirm")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("payment_method".into(), "pm_card_visa".into()),
                mockito::Matcher::UrlEncoded("setup_future_usage".into(), "off_session".into()),
                mockito::Matcher::UrlEncoded("customer".into(), "cus_1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"pi_1","status":"succeeded","amount":4700,"currency":"usd"}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = StripeProvider::initialize(&config(&server.url())).unwrap();
        let details = PaymentDetails {
            payment_method_id: "pm_card_visa".to_string(),
            provider: Some("stripe".to_string()),
            method_type: "card".to_string(),
            customer_id: Some("cus_1".to_string()),
            billing_info: None,
            save_payment_method: true,
        };
        let payment = provider.process_payment("pi_1", &details).await.unwrap();

        confirm.assert_async().await;
        assert_eq!(payment.status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_card_decline_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _confirm = server
            .mock("POST", "/v1/payment_intents/pi_1/confirm")
            .with_status(402)
            .with_body(
                r#"{"error":{"type":"card_error","code":"card_declined","decline_code":"insufficient_funds","message":"Your card has insufficient funds."}}"#,
            )
            .create_async()
            .await;

        let provider = StripeProvider::initialize(&config(&server.url())).unwrap();
        let details = PaymentDetails {
            payment_method_id: "pm_card_chargeDeclined".to_string(),
            provider: None,
            method_type: "card".to_string(),
            customer_id: None,
            billing_info: None,
            save_payment_method: false,
        };
        let err = provider.process_payment("pi_1", &details).await.unwrap_err();
        assert_eq!(err.to_string(), "Your card has insufficient funds.");
        assert!(!err.is_upstream_failure());
    }

    #[tokio::test]
    async fn test_refund_moves_free_text_reason_to_metadata() {
        let mut server = mockito::Server::new_async().await;
        let refund = server
            .mock("POST", "/v1/refunds")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("payment_intent".into(), "pi_1".into()),
                mockito::Matcher::UrlEncoded("amount".into(), "500".into()),
                mockito::Matcher::UrlEncoded("metadata[reason]".into(), "late delivery".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"id":"re_1","status":"succeeded","amount":500,"currency":"usd","payment_intent":"pi_1"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let provider = StripeProvider::initialize(&config(&server.url())).unwrap();
        let result = provider
            .refund_payment("pi_1", Some(usd(500)), Some("late delivery"))
            .await
            .unwrap();

        refund.assert_async().await;
        assert_eq!(result.status, PaymentStatus::Refunded);
        assert_eq!(result.amount, Some(usd(500)));
    }

    #[test]
    fn test_parse_webhook_events() {
        let provider = StripeProvider::initialize(&config("http://localhost")).unwrap();
        let now = chrono::Utc::now().timestamp();

        let body = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","status":"succeeded"}}}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            STRIPE_SIGNATURE_HEADER,
            stripe_header(body, WEBHOOK_SECRET, now).parse().unwrap(),
        );
        let update = provider.parse_webhook(&headers, body).unwrap().unwrap();
        assert_eq!(update.reference, "pi_1");
        assert_eq!(update.status, PaymentStatus::Paid);

        let body = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1","payment_intent":"pi_1"}}}"#;
        headers.insert(
            STRIPE_SIGNATURE_HEADER,
            stripe_header(body, WEBHOOK_SECRET, now).parse().unwrap(),
        );
        let update = provider.parse_webhook(&headers, body).unwrap().unwrap();
        assert_eq!(update.status, PaymentStatus::Refunded);

        let body = br#"{"type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        headers.insert(
            STRIPE_SIGNATURE_HEADER,
            stripe_header(body, WEBHOOK_SECRET, now).parse().unwrap(),
        );
        assert!(provider.parse_webhook(&headers, body).unwrap().is_none());
    }

    #[test]
    fn test_parse_webhook_requires_secret() {
        let mut cfg = config("http://localhost");
        cfg.webhook_secret = None;
        let provider = StripeProvider::initialize(&cfg).unwrap();
        assert!(matches!(
            provider.parse_webhook(&HeaderMap::new(), b"{}"),
            Err(PaymentError::Configuration { .. })
        ));
    }
}
