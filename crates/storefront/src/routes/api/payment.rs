//! Payment endpoints: intents, processing, verification, provider discovery,
//! and vendor webhooks.
//!
//! Provider failures are answered with the uniform [`PaymentResult`] body and
//! a 400, so the browser always gets `{success, paymentId, status, error}`.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;
use validator::{Validate, ValidationError};

use meridian_core::{CheckoutSessionId, OrderId, Price, ProviderKind};

use crate::error::{AppError, Result};
use crate::extract::ValidatedJson;
use crate::middleware::OptionalUser;
use crate::payments::{
    BillingInfo, MetaLineItem, OrderMeta, PaymentDetails, PaymentIntent, PaymentMethodDescriptor,
    PaymentResult, PaymentService, ProviderDescriptor,
};
use crate::services::CheckoutError;
use crate::state::AppState;

use super::visitor_checkout;

/// Browser-facing payment routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-intent", post(create_intent))
        .route("/process", post(process))
        .route("/verify", post(verify))
        .route("/methods", get(methods))
        .route("/providers", get(providers))
}

/// Vendor webhook routes, kept apart so they are never rate limited.
pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/webhook/{provider}", post(webhook))
}

fn payment_response(result: PaymentResult) -> Response {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(result)).into_response()
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub session_id: CheckoutSessionId,
    #[serde(default)]
    #[validate(length(min = 1, max = 20))]
    pub provider: Option<String>,
}

/// Create a vendor payment for the checkout total and attach it to the session.
#[instrument(skip(state, session, user, request), fields(checkout_session_id = %request.session_id))]
pub async fn create_intent(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    ValidatedJson(request): ValidatedJson<CreateIntentRequest>,
) -> Result<Json<PaymentIntent>> {
    let checkout = visitor_checkout(&state, &session, user.as_ref(), request.session_id).await?;
    if checkout.is_confirmed() {
        return Err(CheckoutError::Confirmed.into());
    }
    if checkout.shipping_option_id.is_none() {
        return Err(AppError::BadRequest(
            "Choose a shipping option before paying".to_string(),
        ));
    }

    let (cart, totals) = state.checkout().totals(&checkout).await?;
    let currency = state.config().store.currency;
    let meta = OrderMeta {
        reference_id: checkout.id.to_string(),
        email: checkout.email.as_ref().map(ToString::to_string),
        description: Some(format!("Checkout {}", checkout.id)),
        line_items: cart
            .items
            .iter()
            .map(|item| MetaLineItem {
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: Price::new(item.unit_price, currency),
            })
            .collect(),
    };

    let intent = state
        .payments()
        .create_payment(
            request.provider.as_deref(),
            Price::new(totals.total, currency),
            &meta,
        )
        .await?;

    state
        .checkout()
        .attach_payment(checkout.id, &intent.payment_intent_id, intent.provider)
        .await?;

    tracing::info!(
        payment_intent_id = %intent.payment_intent_id,
        provider = %intent.provider,
        amount = %intent.amount.amount,
        "Payment intent created"
    );
    Ok(Json(intent))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    #[serde(default)]
    #[validate(required, length(min = 1, max = 255))]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    #[validate(required, length(min = 1, max = 512))]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    #[validate(required, custom(function = "validate_provider"))]
    pub provider: Option<String>,
    #[serde(default, rename = "type")]
    #[validate(required, custom(function = "validate_method_type"))]
    pub method_type: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub customer_id: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub billing_info: Option<BillingInfo>,
    #[serde(default)]
    pub save_payment_method: bool,
}

fn validate_provider(provider: &str) -> std::result::Result<(), ValidationError> {
    if provider.to_ascii_lowercase().parse::<ProviderKind>().is_ok() {
        Ok(())
    } else {
        Err(ValidationError::new("provider").with_message("must be square or stripe".into()))
    }
}

fn validate_method_type(method_type: &str) -> std::result::Result<(), ValidationError> {
    if PaymentService::is_known_method(method_type) {
        Ok(())
    } else {
        Err(ValidationError::new("type").with_message("is not a supported payment method".into()))
    }
}

/// Charge the payment method against an intent.
#[instrument(skip(state, request), fields(provider = ?request.provider, method = ?request.method_type))]
pub async fn process(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ProcessPaymentRequest>,
) -> Response {
    let (Some(intent), Some(method), Some(method_type)) = (
        request.payment_intent_id,
        request.payment_method_id,
        request.method_type,
    ) else {
        // `required` validation already rejected these
        return payment_response(PaymentResult::failure("Missing payment details"));
    };

    let details = PaymentDetails {
        payment_method_id: method,
        provider: request.provider,
        method_type,
        customer_id: request.customer_id,
        billing_info: request.billing_info,
        save_payment_method: request.save_payment_method,
    };
    payment_response(state.payments().process_payment(&intent, &details).await)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, max = 255))]
    pub payment_intent_id: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 20))]
    pub provider: Option<String>,
}

/// Ask the provider whether the payment has gone through.
#[instrument(skip(state, request), fields(payment_intent_id = %request.payment_intent_id))]
pub async fn verify(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<VerifyPaymentRequest>,
) -> Response {
    payment_response(
        state
            .payments()
            .verify_payment(&request.payment_intent_id, request.provider.as_deref())
            .await,
    )
}

/// Payment methods offered by the configured providers.
pub async fn methods(State(state): State<AppState>) -> Json<Vec<PaymentMethodDescriptor>> {
    Json(state.payments().payment_methods())
}

pub async fn providers(State(state): State<AppState>) -> Json<Vec<ProviderDescriptor>> {
    Json(state.payments().available_providers())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub order_id: Option<OrderId>,
}

/// Verify a vendor notification and apply it to the matching order.
///
/// Events we do not act on are acknowledged so the vendor stops retrying.
#[instrument(skip(state, headers, body), fields(body_len = body.len()))]
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let update = state
        .payments()
        .parse_webhook(&provider, &headers, &body)
        .inspect_err(|e| tracing::warn!(error = %e, "Rejected webhook"))?;

    let Some(update) = update else {
        return Ok(Json(WebhookAck {
            received: true,
            order_id: None,
        }));
    };

    let order = state.orders().apply_webhook_update(&update).await?;
    Ok(Json(WebhookAck {
        received: true,
        order_id: order.map(|o| o.id),
    }))
}
