//! Core types for the Meridian storefront.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod order_number;
pub mod price;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use order_number::generate_order_number;
pub use price::{CurrencyCode, Price};
pub use status::*;
