//! HTTP middleware stack for the storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. Request ID (add unique ID to each request)
//! 3. `TraceLayer` (request span with request id, status and latency)
//! 4. Session layer (tower-sessions with `PostgreSQL` store)
//! 5. Rate limiting on the checkout and payment routers (governor)

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use auth::{OptionalUser, RequireAdmin, RequireUser};
pub use rate_limit::{checkout_rate_limiter, payment_rate_limiter};
pub use request_id::{RequestId, request_id_middleware};
pub use session::{session_cart_id, session_layer, set_session_cart_id};
