//! Square adapter over the Square REST API (`/v2`).
//!
//! A Square "payment intent" is an order created at the configured location.
//! The browser SDK tokenizes a card into a source id, and `process_payment`
//! charges the order's total with it.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use meridian_core::{CurrencyCode, PaymentStatus, Price, ProviderKind};

use super::webhook::{SQUARE_SIGNATURE_HEADER, required_header, verify_square_signature};
use super::{
    BillingInfo, OrderMeta, PaymentDetails, PaymentError, PaymentIntent, PaymentProvider,
    ProviderDescriptor, ProviderPayment, ProviderRefund, WebhookUpdate, snippet, vendor_client,
};
use crate::config::{SquareConfig, SquareEnvironment};

/// Square API version sent with every request.
pub const SQUARE_VERSION: &str = "2025-01-23";

const KIND: ProviderKind = ProviderKind::Square;

/// Map a Square payment status to ours.
///
/// Returns `None` for statuses Square may add in the future.
#[must_use]
pub fn map_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "APPROVED" => Some(PaymentStatus::Processing),
        "PENDING" => Some(PaymentStatus::Pending),
        "COMPLETED" => Some(PaymentStatus::Paid),
        "CANCELED" => Some(PaymentStatus::Cancelled),
        "FAILED" => Some(PaymentStatus::Failed),
        _ => None,
    }
}

/// Map a Square refund status. Pending refunds count as refunded.
fn map_refund_status(status: &str) -> PaymentStatus {
    match status {
        "PENDING" | "COMPLETED" => PaymentStatus::Refunded,
        _ => PaymentStatus::Failed,
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Money {
    amount: i64,
    currency: CurrencyCode,
}

impl Money {
    fn from_price(price: Price) -> Result<Self, PaymentError> {
        let amount = price
            .to_minor_units()
            .filter(|amount| *amount > 0)
            .ok_or_else(|| {
                PaymentError::InvalidRequest(format!("amount must be positive, got {price}"))
            })?;
        Ok(Self {
            amount,
            currency: price.currency_code,
        })
    }

    fn to_price(self) -> Price {
        Price::from_minor_units(self.amount, self.currency)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrderLineItem {
    name: String,
    quantity: String,
    base_price_money: Money,
}

#[derive(Debug, Serialize)]
struct ServiceCharge {
    name: &'static str,
    amount_money: Money,
    calculation_phase: &'static str,
}

#[derive(Debug, Serialize)]
struct NewOrder {
    location_id: String,
    reference_id: String,
    line_items: Vec<OrderLineItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    service_charges: Vec<ServiceCharge>,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    idempotency_key: String,
    order: NewOrder,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: SquareOrder,
}

#[derive(Debug, Deserialize)]
struct SquareOrder {
    id: String,
    #[serde(default)]
    total_money: Option<Money>,
    #[serde(default)]
    tenders: Vec<Tender>,
}

#[derive(Debug, Deserialize)]
struct Tender {
    #[serde(default)]
    payment_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    address_line_1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address_line_2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    administrative_district_level_1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<String>,
}

impl From<&BillingInfo> for Address {
    fn from(info: &BillingInfo) -> Self {
        Self {
            address_line_1: info.line1.clone(),
            address_line_2: info.line2.clone(),
            locality: info.city.clone(),
            administrative_district_level_1: info.region.clone(),
            postal_code: info.postal_code.clone(),
            country: info.country.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatePaymentRequest<'a> {
    idempotency_key: String,
    source_id: &'a str,
    amount_money: Money,
    order_id: &'a str,
    location_id: &'a str,
    autocomplete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer_email_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    billing_address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    payment: SquarePayment,
}

#[derive(Debug, Deserialize)]
struct SquarePayment {
    id: String,
    status: String,
    #[serde(default)]
    amount_money: Option<Money>,
    #[serde(default)]
    total_money: Option<Money>,
}

impl SquarePayment {
    fn normalize(self) -> Result<ProviderPayment, PaymentError> {
        let status = map_status(&self.status).ok_or_else(|| PaymentError::UnexpectedResponse {
            provider: KIND,
            message: format!("unknown payment status {}", self.status),
        })?;
        Ok(ProviderPayment {
            id: self.id,
            status,
            vendor_status: self.status,
            amount: self.total_money.or(self.amount_money).map(Money::to_price),
        })
    }
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    idempotency_key: String,
    payment_id: &'a str,
    amount_money: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    refund: SquareRefund,
}

#[derive(Debug, Deserialize)]
struct SquareRefund {
    id: String,
    status: String,
    payment_id: String,
    #[serde(default)]
    amount_money: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    #[serde(default)]
    object: WebhookObject,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookObject {
    #[serde(default)]
    payment: Option<WebhookPayment>,
    #[serde(default)]
    refund: Option<WebhookRefund>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    id: String,
    status: String,
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookRefund {
    status: String,
    payment_id: String,
    #[serde(default)]
    order_id: Option<String>,
}

// =============================================================================
// Provider
// =============================================================================

/// Square payment provider.
pub struct SquareProvider {
    client: reqwest::Client,
    base_url: String,
    location_id: String,
    application_id: Option<String>,
    environment: SquareEnvironment,
    webhook_signature_key: Option<SecretString>,
    webhook_url: Option<String>,
}

impl SquareProvider {
    /// Validate credentials and build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the access token or location id is blank, or
    /// if the token cannot be used as a header value.
    pub fn initialize(config: &SquareConfig) -> Result<Self, PaymentError> {
        let token = config.access_token.expose_secret().trim();
        if token.is_empty() {
            return Err(configuration("access token is empty"));
        }
        if config.location_id.trim().is_empty() {
            return Err(configuration("location id is empty"));
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| configuration("access token is not a valid header value"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert("Square-Version", HeaderValue::from_static(SQUARE_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let base_url = config
            .base_url_override
            .as_deref()
            .unwrap_or_else(|| config.environment.base_url())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: vendor_client(KIND, headers)?,
            base_url,
            location_id: config.location_id.trim().to_string(),
            application_id: config.application_id.clone(),
            environment: config.environment,
            webhook_signature_key: config.webhook_signature_key.clone(),
            webhook_url: config.webhook_url.clone(),
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
            tracing::warn!(body = %snippet(&body), "Unparseable Square response");
            PaymentError::UnexpectedResponse {
                provider: KIND,
                message: e.to_string(),
            }
        })
    }

    /// Fetch the configured location and check it can take `currency`.
    async fn check_location(&self, currency: CurrencyCode) -> Result<(), PaymentError> {
        let response: LocationResponse = self
            .send(
                self.client
                    .get(self.url(&format!("/v2/locations/{}", self.location_id))),
            )
            .await?;
        let location = response.location;

        if location.status.as_deref().is_some_and(|s| s != "ACTIVE") {
            return Err(configuration(&format!("location {} is not active", location.id)));
        }
        match location.currency.as_deref() {
            Some(settles) if settles != currency.code() => Err(configuration(&format!(
                "location {} settles in {settles}, store charges {currency}",
                location.id
            ))),
            _ => Ok(()),
        }
    }

    async fn retrieve_order(&self, order_id: &str) -> Result<SquareOrder, PaymentError> {
        let response: OrderResponse = self
            .send(self.client.get(self.url(&format!("/v2/orders/{order_id}"))))
            .await?;
        Ok(response.order)
    }

    async fn post_payment_action(
        &self,
        payment_id: &str,
        action: &str,
    ) -> Result<ProviderPayment, PaymentError> {
        let response: PaymentResponse = self
            .send(
                self.client
                    .post(self.url(&format!("/v2/payments/{payment_id}/{action}")))
                    .json(&serde_json::json!({})),
            )
            .await?;
        response.payment.normalize()
    }
}

fn configuration(message: &str) -> PaymentError {
    PaymentError::Configuration {
        provider: KIND,
        message: message.to_string(),
    }
}

/// Turn a Square error body into `PaymentError::Api`.
fn api_error(status: u16, body: &str) -> PaymentError {
    let first = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.errors.into_iter().next());

    match first {
        Some(detail) => {
            tracing::debug!(
                status,
                category = detail.category.as_deref().unwrap_or_default(),
                code = detail.code.as_deref().unwrap_or_default(),
                "Square API error"
            );
            PaymentError::Api {
                provider: KIND,
                status,
                message: detail
                    .detail
                    .or_else(|| detail.code.clone())
                    .unwrap_or_else(|| format!("Square returned HTTP {status}")),
                code: detail.code,
            }
        }
        None => PaymentError::Api {
            provider: KIND,
            status,
            code: None,
            message: format!("Square returned HTTP {status}"),
        },
    }
}

/// Build order line items whose total is exactly `amount`.
///
/// Shipping and tax ride along as a single service charge. If the line items
/// already exceed `amount` (discounts), a single line item for the total is
/// used instead.
fn order_lines(
    amount: Money,
    meta: &OrderMeta,
) -> Result<(Vec<OrderLineItem>, Vec<ServiceCharge>), PaymentError> {
    let mut lines = Vec::with_capacity(meta.line_items.len());
    let mut items_total: i64 = 0;
    for item in &meta.line_items {
        let unit = Money::from_price(item.unit_price)?;
        items_total = items_total.saturating_add(unit.amount.saturating_mul(i64::from(item.quantity)));
        lines.push(OrderLineItem {
            name: item.name.clone(),
            quantity: item.quantity.to_string(),
            base_price_money: unit,
        });
    }

    if lines.is_empty() || items_total > amount.amount {
        let name = meta
            .description
            .clone()
            .unwrap_or_else(|| format!("Order {}", meta.reference_id));
        return Ok((
            vec![OrderLineItem {
                name,
                quantity: "1".to_string(),
                base_price_money: amount,
            }],
            Vec::new(),
        ));
    }

    let remainder = amount.amount - items_total;
    let charges = if remainder > 0 {
        vec![ServiceCharge {
            name: "Shipping and tax",
            amount_money: Money {
                amount: remainder,
                currency: amount.currency,
            },
            calculation_phase: "SUBTOTAL_PHASE",
        }]
    } else {
        Vec::new()
    };
    Ok((lines, charges))
}

#[async_trait]
impl PaymentProvider for SquareProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: KIND,
            display_name: "Square",
            environment: self.environment.as_str().to_string(),
            application_id: self.application_id.clone(),
            location_id: Some(self.location_id.clone()),
            publishable_key: None,
            is_default: false,
        }
    }

    #[instrument(skip(self, meta), fields(reference = %meta.reference_id, amount = %amount))]
    async fn create_payment(
        &self,
        amount: Price,
        meta: &OrderMeta,
    ) -> Result<PaymentIntent, PaymentError> {
        let money = Money::from_price(amount)?;
        self.check_location(amount.currency_code).await?;

        let (line_items, service_charges) = order_lines(money, meta)?;
        let request = CreateOrderRequest {
            idempotency_key: Uuid::new_v4().to_string(),
            order: NewOrder {
                location_id: self.location_id.clone(),
                reference_id: meta.reference_id.clone(),
                line_items,
                service_charges,
            },
        };

        let response: OrderResponse = self
            .send(self.client.post(self.url("/v2/orders")).json(&request))
            .await?;
        let order = response.order;
        tracing::info!(order_id = %order.id, "Created Square order");

        Ok(PaymentIntent {
            client_secret: format!("{}:{}", self.location_id, order.id),
            payment_intent_id: order.id,
            provider: KIND,
            amount: order.total_money.map_or(amount, Money::to_price),
        })
    }

    #[instrument(skip(self, details), fields(method = %details.method_type))]
    async fn process_payment(
        &self,
        payment_intent_id: &str,
        details: &PaymentDetails,
    ) -> Result<ProviderPayment, PaymentError> {
        let order = self.retrieve_order(payment_intent_id).await?;
        let total = order.total_money.ok_or_else(|| PaymentError::UnexpectedResponse {
            provider: KIND,
            message: format!("order {} has no total", order.id),
        })?;

        let billing = details.billing_info.as_ref();
        let request = CreatePaymentRequest {
            idempotency_key: Uuid::new_v4().to_string(),
            source_id: &details.payment_method_id,
            amount_money: total,
            order_id: &order.id,
            location_id: &self.location_id,
            autocomplete: true,
            customer_id: details.customer_id.as_deref(),
            buyer_email_address: billing.and_then(|b| b.email.as_deref()),
            billing_address: billing.map(Address::from),
        };

        let response: PaymentResponse = self
            .send(self.client.post(self.url("/v2/payments")).json(&request))
            .await?;
        let payment = response.payment.normalize()?;
        tracing::info!(payment_id = %payment.id, status = %payment.status, "Processed Square payment");
        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn verify_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<ProviderPayment, PaymentError> {
        let order = self.retrieve_order(payment_intent_id).await?;
        let payment_id = order.tenders.iter().find_map(|t| t.payment_id.clone());

        match payment_id {
            Some(payment_id) => self.get_payment(&payment_id).await,
            None => Ok(ProviderPayment {
                id: order.id,
                status: PaymentStatus::Pending,
                vendor_status: "NO_TENDERS".to_string(),
                amount: order.total_money.map(Money::to_price),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        let response: PaymentResponse = self
            .send(self.client.get(self.url(&format!("/v2/payments/{payment_id}"))))
            .await?;
        response.payment.normalize()
    }

    #[instrument(skip(self))]
    async fn capture_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        self.post_payment_action(payment_id, "complete").await
    }

    #[instrument(skip(self))]
    async fn cancel_payment(&self, payment_id: &str) -> Result<ProviderPayment, PaymentError> {
        self.post_payment_action(payment_id, "cancel").await
    }

    #[instrument(skip(self))]
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Price>,
        reason: Option<&str>,
    ) -> Result<ProviderRefund, PaymentError> {
        let amount_money = match amount {
            Some(amount) => Money::from_price(amount)?,
            None => {
                let payment = self.get_payment(payment_id).await?;
                let total = payment.amount.ok_or_else(|| PaymentError::UnexpectedResponse {
                    provider: KIND,
                    message: format!("payment {payment_id} has no amount"),
                })?;
                Money::from_price(total)?
            }
        };

        let request = RefundRequest {
            idempotency_key: Uuid::new_v4().to_string(),
            payment_id,
            amount_money,
            reason,
        };
        let response: RefundResponse = self
            .send(self.client.post(self.url("/v2/refunds")).json(&request))
            .await?;
        let refund = response.refund;

        Ok(ProviderRefund {
            status: map_refund_status(&refund.status),
            id: refund.id,
            payment_id: refund.payment_id,
            vendor_status: refund.status,
            amount: refund.amount_money.map(Money::to_price),
        })
    }

    fn parse_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<WebhookUpdate>, PaymentError> {
        let (Some(key), Some(url)) = (&self.webhook_signature_key, &self.webhook_url) else {
            return Err(configuration("webhook signature key and URL are not configured"));
        };
        let signature = required_header(headers, SQUARE_SIGNATURE_HEADER)?;
        verify_square_signature(signature, url, body, key.expose_secret())?;

        let event: WebhookEvent =
            serde_json::from_slice(body).map_err(|e| PaymentError::UnexpectedResponse {
                provider: KIND,
                message: format!("webhook body: {e}"),
            })?;
        let object = event.data.map(|d| d.object).unwrap_or_default();

        let update = match event.event_type.as_str() {
            "payment.created" | "payment.updated" => object.payment.and_then(|payment| {
                let status = map_status(&payment.status)?;
                Some(WebhookUpdate {
                    provider: KIND,
                    reference: payment.order_id?,
                    payment_id: Some(payment.id),
                    status,
                    event_type: event.event_type.clone(),
                })
            }),
            "refund.created" | "refund.updated" => object
                .refund
                .filter(|refund| map_refund_status(&refund.status) == PaymentStatus::Refunded)
                .and_then(|refund| {
                    Some(WebhookUpdate {
                        provider: KIND,
                        reference: refund.order_id?,
                        payment_id: Some(refund.payment_id),
                        status: PaymentStatus::Refunded,
                        event_type: event.event_type.clone(),
                    })
                }),
            _ => None,
        };

        if update.is_none() {
            tracing::debug!(event_type = %event.event_type, "Ignoring Square webhook event");
        }
        Ok(update)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::payments::MetaLineItem;
    use crate::payments::webhook::tests::square_signature;

    const WEBHOOK_KEY: &str = "sq_sig_Jq7Tn4Vx9Rb2Lm6Wc";
    const WEBHOOK_URL: &str = "https://shop.meridian.example/api/payment/webhook/square";

    fn config(base_url: &str) -> SquareConfig {
        SquareConfig {
            access_token: SecretString::from("EAAAl_test_token"),
            location_id: "LOC1".to_string(),
            application_id: Some("sandbox-sq0idb-app".to_string()),
            environment: SquareEnvironment::Sandbox,
            webhook_signature_key: Some(SecretString::from(WEBHOOK_KEY)),
            webhook_url: Some(WEBHOOK_URL.to_string()),
            base_url_override: Some(base_url.to_string()),
        }
    }

    fn usd(minor: i64) -> Price {
        Price::from_minor_units(minor, CurrencyCode::USD)
    }

    fn meta() -> OrderMeta {
        OrderMeta {
            reference_id: "chk_1".to_string(),
            email: Some("buyer@example.com".to_string()),
            description: None,
            line_items: vec![MetaLineItem {
                name: "Linen Apron".to_string(),
                quantity: 2,
                unit_price: usd(2000),
            }],
        }
    }

    fn details() -> PaymentDetails {
        PaymentDetails {
            payment_method_id: "cnon:card-nonce-ok".to_string(),
            provider: Some("square".to_string()),
            method_type: "card".to_string(),
            customer_id: None,
            billing_info: None,
            save_payment_method: false,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("APPROVED"), Some(PaymentStatus::Processing));
        assert_eq!(map_status("PENDING"), Some(PaymentStatus::Pending));
        assert_eq!(map_status("COMPLETED"), Some(PaymentStatus::Paid));
        assert_eq!(map_status("CANCELED"), Some(PaymentStatus::Cancelled));
        assert_eq!(map_status("FAILED"), Some(PaymentStatus::Failed));
        assert_eq!(map_status("completed"), None);
        assert_eq!(map_refund_status("PENDING"), PaymentStatus::Refunded);
        assert_eq!(map_refund_status("REJECTED"), PaymentStatus::Failed);
    }

    #[test]
    fn test_initialize_validates_credentials() {
        let mut cfg = config("http://localhost");
        cfg.location_id = "  ".to_string();
        assert!(matches!(
            SquareProvider::initialize(&cfg),
            Err(PaymentError::Configuration { .. })
        ));

        let mut cfg = config("http://localhost");
        cfg.access_token = SecretString::from("");
        assert!(SquareProvider::initialize(&cfg).is_err());

        assert!(SquareProvider::initialize(&config("http://localhost")).is_ok());
    }

    #[test]
    fn test_order_lines_adds_service_charge_for_remainder() {
        let (lines, charges) = order_lines(Money::from_price(usd(4700)).unwrap(), &meta()).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines.first().unwrap().quantity, "2");
        assert_eq!(charges.len(), 1);
        assert_eq!(charges.first().unwrap().amount_money.amount, 700);
    }

    #[test]
    fn test_order_lines_collapses_when_items_exceed_amount() {
        let (lines, charges) = order_lines(Money::from_price(usd(3000)).unwrap(), &meta()).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines.first().unwrap().base_price_money.amount, 3000);
        assert!(charges.is_empty());
    }

    #[test]
    fn test_money_rejects_non_positive() {
        assert!(Money::from_price(usd(0)).is_err());
        assert!(Money::from_price(Price::new(Decimal::new(-1, 0), CurrencyCode::USD)).is_err());
    }

    #[tokio::test]
    async fn test_create_payment_returns_composite_client_secret() {
        let mut server = mockito::Server::new_async().await;
        let _location = server
            .mock("GET", "/v2/locations/LOC1")
            .match_header("authorization", "Bearer EAAAl_test_token")
            .match_header("square-version", SQUARE_VERSION)
            .with_status(200)
            .with_body(r#"{"location":{"id":"LOC1","status":"ACTIVE","currency":"USD"}}"#)
            .create_async()
            .await;
        let orders = server
            .mock("POST", "/v2/orders")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"order":{"location_id":"LOC1","reference_id":"chk_1"}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"order":{"id":"ORD9","total_money":{"amount":4700,"currency":"USD"}}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let provider = SquareProvider::initialize(&config(&server.url())).unwrap();
        let intent = provider.create_payment(usd(4700), &meta()).await.unwrap();

        orders.assert_async().await;
        assert_eq!(intent.payment_intent_id, "ORD9");
        assert_eq!(intent.client_secret, "LOC1:ORD9");
        assert_eq!(intent.amount, usd(4700));
    }

    #[tokio::test]
    async fn test_create_payment_rejects_currency_mismatch() {
        let mut server = mockito::Server::new_async().await;
        let _location = server
            .mock("GET", "/v2/locations/LOC1")
            .with_status(200)
            .with_body(r#"{"location":{"id":"LOC1","status":"ACTIVE","currency":"CAD"}}"#)
            .create_async()
            .await;

        let provider = SquareProvider::initialize(&config(&server.url())).unwrap();
        let err = provider.create_payment(usd(4700), &meta()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_process_payment_charges_order_total() {
        let mut server = mockito::Server::new_async().await;
        let _order = server
            .mock("GET", "/v2/orders/ORD9")
            .with_status(200)
            .with_body(
                r#"{"order":{"id":"ORD9","total_money":{"amount":4700,"currency":"USD"}}}"#,
            )
            .create_async()
            .await;
        let payments = server
            .mock("POST", "/v2/payments")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"source_id":"cnon:card-nonce-ok","order_id":"ORD9","autocomplete":true,"amount_money":{"amount":4700,"currency":"USD"}}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"payment":{"id":"PAY1","status":"COMPLETED","order_id":"ORD9","total_money":{"amount":4700,"currency":"USD"}}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let provider = SquareProvider::initialize(&config(&server.url())).unwrap();
        let payment = provider.process_payment("ORD9", &details()).await.unwrap();

        payments.assert_async().await;
        assert_eq!(payment.id, "PAY1");
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.amount, Some(usd(4700)));
    }

    #[tokio::test]
    async fn test_verify_payment_without_tenders_is_pending() {
        let mut server = mockito::Server::new_async().await;
        let _order = server
            .mock("GET", "/v2/orders/ORD9")
            .with_status(200)
            .with_body(r#"{"order":{"id":"ORD9","tenders":[]}}"#)
            .create_async()
            .await;

        let provider = SquareProvider::initialize(&config(&server.url())).unwrap();
        let payment = provider.verify_payment("ORD9").await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_verify_payment_follows_first_tender() {
        let mut server = mockito::Server::new_async().await;
        let _order = server
            .mock("GET", "/v2/orders/ORD9")
            .with_status(200)
            .with_body(r#"{"order":{"id":"ORD9","tenders":[{"payment_id":"PAY1"}]}}"#)
            .create_async()
            .await;
        let _payment = server
            .mock("GET", "/v2/payments/PAY1")
            .with_status(200)
            .with_body(r#"{"payment":{"id":"PAY1","status":"APPROVED"}}"#)
            .create_async()
            .await;

        let provider = SquareProvider::initialize(&config(&server.url())).unwrap();
        let payment = provider.verify_payment("ORD9").await.unwrap();
        assert_eq!(payment.id, "PAY1");
        assert_eq!(payment.status, PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn test_api_error_carries_vendor_detail() {
        let mut server = mockito::Server::new_async().await;
        let _payment = server
            .mock("GET", "/v2/payments/PAY1")
            .with_status(404)
            .with_body(
                r#"{"errors":[{"category":"INVALID_REQUEST_ERROR","code":"NOT_FOUND","detail":"Payment not found."}]}"#,
            )
            .create_async()
            .await;

        let provider = SquareProvider::initialize(&config(&server.url())).unwrap();
        let err = provider.get_payment("PAY1").await.unwrap_err();
        match err {
            PaymentError::Api {
                status,
                code,
                message,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(code.as_deref(), Some("NOT_FOUND"));
                assert_eq!(message, "Payment not found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_refund_fetches_payment_amount() {
        let mut server = mockito::Server::new_async().await;
        let _payment = server
            .mock("GET", "/v2/payments/PAY1")
            .with_status(200)
            .with_body(
                r#"{"payment":{"id":"PAY1","status":"COMPLETED","total_money":{"amount":4700,"currency":"USD"}}}"#,
            )
            .create_async()
            .await;
        let refunds = server
            .mock("POST", "/v2/refunds")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"payment_id":"PAY1","amount_money":{"amount":4700,"currency":"USD"}}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"refund":{"id":"R1","status":"PENDING","payment_id":"PAY1","amount_money":{"amount":4700,"currency":"USD"}}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let provider = SquareProvider::initialize(&config(&server.url())).unwrap();
        let refund = provider.refund_payment("PAY1", None, Some("damaged")).await.unwrap();

        refunds.assert_async().await;
        assert_eq!(refund.status, PaymentStatus::Refunded);
        assert_eq!(refund.payment_id, "PAY1");
    }

    #[test]
    fn test_parse_webhook_payment_updated() {
        let provider = SquareProvider::initialize(&config("http://localhost")).unwrap();
        let body = br#"{"type":"payment.updated","data":{"object":{"payment":{"id":"PAY1","status":"COMPLETED","order_id":"ORD9"}}}}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            SQUARE_SIGNATURE_HEADER,
            square_signature(WEBHOOK_URL, body, WEBHOOK_KEY).parse().unwrap(),
        );

        let update = provider.parse_webhook(&headers, body).unwrap().unwrap();
        assert_eq!(update.reference, "ORD9");
        assert_eq!(update.payment_id.as_deref(), Some("PAY1"));
        assert_eq!(update.status, PaymentStatus::Paid);
    }

    #[test]
    fn test_parse_webhook_rejects_bad_signature_and_ignores_unknown() {
        let provider = SquareProvider::initialize(&config("http://localhost")).unwrap();
        let body = br#"{"type":"customer.created","data":{"object":{}}}"#;

        let mut headers = HeaderMap::new();
        headers.insert(SQUARE_SIGNATURE_HEADER, "AAAA".parse().unwrap());
        assert!(matches!(
            provider.parse_webhook(&headers, body),
            Err(PaymentError::InvalidSignature(_))
        ));

        headers.insert(
            SQUARE_SIGNATURE_HEADER,
            square_signature(WEBHOOK_URL, body, WEBHOOK_KEY).parse().unwrap(),
        );
        assert!(provider.parse_webhook(&headers, body).unwrap().is_none());
    }
}
