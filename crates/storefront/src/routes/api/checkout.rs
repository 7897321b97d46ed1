//! Checkout endpoints and order placement.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;
use validator::Validate;

use meridian_core::{CheckoutSessionId, Email, OrderId, OrderStatus};

use crate::error::{AppError, FieldError, Result};
use crate::extract::ValidatedJson;
use crate::middleware::OptionalUser;
use crate::models::{Address, CartItem, CheckoutSession, OrderTotals};
use crate::payments::PaymentResult;
use crate::services::{CheckoutInformation, PlaceOrder, ShippingOption};
use crate::state::AppState;

use super::{visitor_cart, visitor_checkout};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start))
        .route("/shipping-options", get(shipping_options))
        .route("/place-order", post(place_order))
        .route("/{id}", get(show))
        .route("/{id}/information", post(update_information))
        .route("/{id}/shipping", post(select_shipping))
        .route("/{id}/step", post(set_step))
}

/// A checkout session with its cart lines and current totals.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    #[serde(flatten)]
    pub session: CheckoutSession,
    pub items: Vec<CartItem>,
    pub totals: OrderTotals,
}

async fn view(state: &AppState, session: CheckoutSession) -> Result<CheckoutView> {
    let (cart, totals) = state.checkout().totals(&session).await?;
    Ok(CheckoutView {
        session,
        items: cart.items,
        totals,
    })
}

fn parse_email(value: &str) -> Result<Email> {
    Email::parse(value)
        .map_err(|e| AppError::Validation(vec![FieldError::new("email", e.to_string())]))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct StartRequest {
    #[serde(default)]
    #[validate(email)]
    pub email: Option<String>,
}

/// Shipping options priced for the visitor's cart.
#[instrument(skip(state, session, user))]
pub async fn shipping_options(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
) -> Result<Json<Vec<ShippingOption>>> {
    let cart = visitor_cart(&state, &session, user.as_ref()).await?;
    Ok(Json(state.shipping().options(cart.subtotal())))
}

/// Start checkout for the visitor's cart.
#[instrument(skip(state, session, user, request))]
pub async fn start(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    ValidatedJson(request): ValidatedJson<StartRequest>,
) -> Result<(StatusCode, Json<CheckoutView>)> {
    let email = match request.email.as_deref() {
        Some(email) => Some(parse_email(email)?),
        None => user.as_ref().map(|u| u.email.clone()),
    };
    let cart = visitor_cart(&state, &session, user.as_ref()).await?;
    let checkout = state.checkout().start(&cart, email).await?;
    Ok((StatusCode::CREATED, Json(view(&state, checkout).await?)))
}

#[instrument(skip(state, session, user))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Path(id): Path<CheckoutSessionId>,
) -> Result<Json<CheckoutView>> {
    let checkout = visitor_checkout(&state, &session, user.as_ref(), id).await?;
    Ok(Json(view(&state, checkout).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InformationRequest {
    #[validate(email)]
    pub email: String,
    #[validate(nested)]
    pub shipping_address: Address,
    #[serde(default)]
    #[validate(nested)]
    pub billing_address: Option<Address>,
}

#[instrument(skip(state, session, user, request))]
pub async fn update_information(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Path(id): Path<CheckoutSessionId>,
    ValidatedJson(request): ValidatedJson<InformationRequest>,
) -> Result<Json<CheckoutView>> {
    visitor_checkout(&state, &session, user.as_ref(), id).await?;
    let info = CheckoutInformation {
        email: parse_email(&request.email)?,
        shipping_address: request.shipping_address,
        billing_address: request.billing_address,
    };
    let checkout = state.checkout().update_information(id, info).await?;
    Ok(Json(view(&state, checkout).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingRequest {
    #[validate(length(min = 1, max = 50))]
    pub shipping_option_id: String,
}

#[instrument(skip(state, session, user, request), fields(option = %request.shipping_option_id))]
pub async fn select_shipping(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Path(id): Path<CheckoutSessionId>,
    ValidatedJson(request): ValidatedJson<ShippingRequest>,
) -> Result<Json<CheckoutView>> {
    visitor_checkout(&state, &session, user.as_ref(), id).await?;
    let checkout = state
        .checkout()
        .select_shipping(id, &request.shipping_option_id)
        .await?;
    Ok(Json(view(&state, checkout).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct StepRequest {
    #[validate(length(min = 1, max = 30))]
    pub step: String,
}

/// Move back (or forward) to an earlier step, e.g. to edit the address.
#[instrument(skip(state, session, user, request), fields(step = %request.step))]
pub async fn set_step(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Path(id): Path<CheckoutSessionId>,
    ValidatedJson(request): ValidatedJson<StepRequest>,
) -> Result<Json<CheckoutView>> {
    visitor_checkout(&state, &session, user.as_ref(), id).await?;
    let checkout = state.checkout().set_step(id, &request.step).await?;
    Ok(Json(view(&state, checkout).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub session_id: CheckoutSessionId,
    #[serde(default)]
    #[validate(length(min = 1, max = 255))]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 255))]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 20))]
    pub payment_provider: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrderSummary {
    pub id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub success: bool,
    pub order: PlacedOrderSummary,
    pub payment: Option<PaymentResult>,
    pub session_id: CheckoutSessionId,
}

/// Verify the payment (when an intent is given) and turn the checkout into an order.
#[instrument(skip(state, session, user, request), fields(checkout_session_id = %request.session_id))]
pub async fn place_order(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    ValidatedJson(request): ValidatedJson<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>> {
    visitor_checkout(&state, &session, user.as_ref(), request.session_id).await?;

    let placed = state
        .orders()
        .place_order(PlaceOrder {
            session_id: request.session_id,
            payment_intent_id: request.payment_intent_id,
            payment_method_id: request.payment_method_id,
            payment_provider: request.payment_provider,
        })
        .await?;

    tracing::info!(
        order_id = %placed.order.id,
        order_number = %placed.order.order_number,
        "Order placed"
    );

    Ok(Json(PlaceOrderResponse {
        success: true,
        order: PlacedOrderSummary {
            id: placed.order.id,
            order_number: placed.order.order_number,
            status: placed.order.status,
        },
        payment: placed.payment,
        session_id: placed.session_id,
    }))
}
