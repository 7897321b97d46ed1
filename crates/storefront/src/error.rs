//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server errors to Sentry
//! before responding to the client. All route handlers return
//! `Result<T, AppError>`. Every error body has the shape
//! `{"success": false, "error": "..."}`; validation errors add an `errors`
//! list of `{field, message}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::payments::PaymentError;
use crate::services::{CartError, CheckoutError, MediaError, OrderError};

/// One invalid field in a request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[source] RepositoryError),

    /// Request body failed schema validation.
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// Payment provider call failed.
    #[error("{0}")]
    Payment(#[from] PaymentError),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// No signed-in user.
    #[error("{0}")]
    Unauthorized(String),

    /// Signed in, but not allowed.
    #[error("{0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("{0}")]
    BadRequest(String),

    /// The resource is no longer in a state that allows the request.
    #[error("{0}")]
    Conflict(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Payment(e) if e.is_upstream_failure() => StatusCode::BAD_GATEWAY,
            Self::Validation(_) | Self::Payment(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    const fn is_server_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = self.status();

        // Don't expose internal error details to clients
        let message = if self.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let errors = match &self {
            Self::Validation(errors) => Some(errors.as_slice()),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: &message,
            errors,
        };
        (status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(message) => Self::Conflict(message),
            RepositoryError::NotFound => Self::NotFound("Not found".to_string()),
            other => Self::Database(other),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = Vec::new();
        collect_field_errors(&errors, "", &mut fields);
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        Self::Validation(fields)
    }
}

/// Flatten nested errors into dotted paths such as `shippingAddress.city`.
fn collect_field_errors(
    errors: &validator::ValidationErrors,
    prefix: &str,
    out: &mut Vec<FieldError>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = format!("{prefix}{}", camel_case(field));
        match kind {
            ValidationErrorsKind::Field(errs) => {
                out.extend(errs.iter().map(|e| {
                    let message = e
                        .message
                        .as_ref()
                        .map_or_else(|| e.code.to_string(), ToString::to_string);
                    FieldError::new(path.clone(), message)
                }));
            }
            ValidationErrorsKind::Struct(inner) => {
                collect_field_errors(inner, &format!("{path}."), out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(inner, &format!("{path}[{index}]."), out);
                }
            }
        }
    }
}

/// Request field names are camelCase on the wire.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::NotFound | CartError::ItemNotFound => Self::NotFound(err.to_string()),
            CartError::NotMutable(_) | CartError::AlreadyCompleted => {
                Self::Conflict(err.to_string())
            }
            CartError::InvalidQuantity(_)
            | CartError::ProductUnavailable
            | CartError::InsufficientStock { .. }
            | CartError::InvalidStatus(_) => Self::BadRequest(err.to_string()),
            CartError::Repository(e) => e.into(),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::NotFound => Self::NotFound(err.to_string()),
            CheckoutError::Confirmed => Self::Conflict(err.to_string()),
            CheckoutError::EmptyCart
            | CheckoutError::UnknownShippingOption(_)
            | CheckoutError::MissingShippingAddress
            | CheckoutError::StepNotAllowed(_)
            | CheckoutError::InvalidStep(_) => Self::BadRequest(err.to_string()),
            CheckoutError::Cart(e) => e.into(),
            CheckoutError::Repository(e) => e.into(),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound | OrderError::SessionNotFound => Self::NotFound(err.to_string()),
            OrderError::AlreadyPlaced => Self::Conflict(err.to_string()),
            OrderError::EmptyCart
            | OrderError::PaymentNotVerified(_)
            | OrderError::PaymentMismatch(_)
            | OrderError::RefundExceedsTotal { .. }
            | OrderError::NoPayment
            | OrderError::Payment(_)
            | OrderError::InvalidStatus(_) => Self::BadRequest(err.to_string()),
            OrderError::Incomplete { .. } => Self::Internal(err.to_string()),
            OrderError::Cart(e) => e.into(),
            OrderError::Checkout(e) => e.into(),
            OrderError::Repository(e) => e.into(),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::ProductNotFound | MediaError::ImageNotFound => {
                Self::NotFound(err.to_string())
            }
            MediaError::Empty
            | MediaError::UnsupportedType(_)
            | MediaError::TooLarge { .. }
            | MediaError::Decode(_) => Self::BadRequest(err.to_string()),
            MediaError::Repository(e) => e.into(),
            MediaError::Encode(_) | MediaError::Task(_) | MediaError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context for the signed-in user.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}
