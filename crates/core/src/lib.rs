//! Meridian Core - Shared types library.
//!
//! This crate provides common types used across all Meridian components:
//! - `storefront` - Public storefront API and admin console
//! - `cli` - Command-line tools for migrations and management
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, emails, order numbers and closed status sets

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
