//! Order management for the admin console.

use axum::{
    Form, Json,
    extract::{Path, Query, State, rejection::FormRejection},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use meridian_core::{OrderId, OrderStatus};

use crate::error::{AppError, Result};
use crate::middleware::RequireAdmin;
use crate::models::{Order, OrderFilter, OrderPage};
use crate::payments::PaymentResult;
use crate::state::AppState;

/// `?status=&page=&per_page=`
#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[instrument(skip(state, admin), fields(admin = %admin.email))]
pub async fn list(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<OrderPage>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let filter = OrderFilter::new(status, query.page, query.per_page);
    Ok(Json(state.orders().list(&filter).await?))
}

#[instrument(skip(state, _admin))]
pub async fn show(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(state.orders().get(id).await?))
}

/// Form posted by the order detail page.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderActionForm {
    pub intent: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderUpdated {
    pub success: bool,
    pub order: Order,
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing field '{field}'")))
}

/// Apply a form action (`updateStatus` or `updatePaymentStatus`) to an order.
#[instrument(skip(state, admin, form), fields(admin = %admin.email))]
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
    form: std::result::Result<Form<OrderActionForm>, FormRejection>,
) -> Result<Json<OrderUpdated>> {
    let Form(form) = form.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let order = match form.intent.as_deref() {
        Some("updateStatus") => {
            let status = required(form.status, "status")?;
            state.orders().update_status(id, &status).await?
        }
        Some("updatePaymentStatus") => {
            let payment_status = required(form.payment_status, "paymentStatus")?;
            state
                .orders()
                .update_payment_status(id, &payment_status)
                .await?
        }
        Some(other) => return Err(AppError::BadRequest(format!("Unknown intent '{other}'"))),
        None => return Err(AppError::BadRequest("Missing field 'intent'".to_string())),
    };

    Ok(Json(OrderUpdated {
        success: true,
        order,
    }))
}

#[derive(Debug, Serialize)]
pub struct PaymentActionResponse {
    pub success: bool,
    pub order: Order,
    pub payment: PaymentResult,
}

impl From<(Order, PaymentResult)> for PaymentActionResponse {
    fn from((order, payment): (Order, PaymentResult)) -> Self {
        Self {
            success: true,
            order,
            payment,
        }
    }
}

#[instrument(skip(state, admin), fields(admin = %admin.email))]
pub async fn capture(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
) -> Result<Json<PaymentActionResponse>> {
    Ok(Json(state.orders().capture_payment(id).await?.into()))
}

#[instrument(skip(state, admin), fields(admin = %admin.email))]
pub async fn cancel_payment(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
) -> Result<Json<PaymentActionResponse>> {
    Ok(Json(state.orders().cancel_payment(id).await?.into()))
}

/// Optional body for refunds; no body refunds the full amount.
#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[instrument(skip(state, admin, body), fields(admin = %admin.email))]
pub async fn refund(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OrderId>,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<PaymentActionResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    if request.amount.is_some_and(|a| a <= Decimal::ZERO) {
        return Err(AppError::BadRequest(
            "Refund amount must be positive".to_string(),
        ));
    }

    let outcome = state
        .orders()
        .refund_payment(id, request.amount, request.reason.as_deref())
        .await?;
    Ok(Json(outcome.into()))
}
