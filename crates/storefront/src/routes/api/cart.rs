//! Cart endpoints.
//!
//! Every handler resolves the visitor's cart first, so the first cart
//! request of a visit creates the cart and stores its id in the session.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;
use validator::Validate;

use meridian_core::{CartItemId, ProductId};

use crate::error::Result;
use crate::extract::ValidatedJson;
use crate::middleware::OptionalUser;
use crate::models::Cart;
use crate::services::cart::MAX_QUANTITY;
use crate::state::AppState;

use super::visitor_cart;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(show).delete(clear))
        .route("/items", post(add_item))
        .route("/items/{item_id}", patch(update_item).delete(remove_item))
}

/// A cart with its computed totals.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub subtotal: Decimal,
    pub item_count: i64,
}

impl From<Cart> for CartView {
    fn from(cart: Cart) -> Self {
        Self {
            subtotal: cart.subtotal(),
            item_count: cart.item_count(),
            cart,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = MAX_QUANTITY))]
    pub quantity: i32,
}

const fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemRequest {
    /// 0 removes the line.
    #[validate(range(min = 0, max = MAX_QUANTITY))]
    pub quantity: i32,
}

#[instrument(skip(state, session, user))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
) -> Result<Json<CartView>> {
    let cart = visitor_cart(&state, &session, user.as_ref()).await?;
    Ok(Json(cart.into()))
}

#[instrument(skip(state, session, user, request), fields(product_id = %request.product_id))]
pub async fn add_item(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    ValidatedJson(request): ValidatedJson<AddItemRequest>,
) -> Result<(StatusCode, Json<CartView>)> {
    let cart = visitor_cart(&state, &session, user.as_ref()).await?;
    let cart = state
        .carts()
        .add_item(cart.id, request.product_id, request.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(cart.into())))
}

#[instrument(skip(state, session, user, request))]
pub async fn update_item(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Path(item_id): Path<CartItemId>,
    ValidatedJson(request): ValidatedJson<UpdateItemRequest>,
) -> Result<Json<CartView>> {
    let cart = visitor_cart(&state, &session, user.as_ref()).await?;
    let cart = state
        .carts()
        .update_item_quantity(cart.id, item_id, request.quantity)
        .await?;
    Ok(Json(cart.into()))
}

#[instrument(skip(state, session, user))]
pub async fn remove_item(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
    Path(item_id): Path<CartItemId>,
) -> Result<Json<CartView>> {
    let cart = visitor_cart(&state, &session, user.as_ref()).await?;
    let cart = state.carts().remove_item(cart.id, item_id).await?;
    Ok(Json(cart.into()))
}

/// Empty the cart. The next cart request starts a fresh one.
#[instrument(skip(state, session, user))]
pub async fn clear(
    State(state): State<AppState>,
    session: Session,
    OptionalUser(user): OptionalUser,
) -> Result<StatusCode> {
    let cart = visitor_cart(&state, &session, user.as_ref()).await?;
    state.carts().clear(cart.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
