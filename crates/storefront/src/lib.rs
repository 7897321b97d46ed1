//! Meridian storefront library.
//!
//! The storefront JSON API, the admin console and the payment provider
//! layer, exposed as a library so the binary, the CLI and the integration
//! tests share one router.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;

pub use routes::app;
