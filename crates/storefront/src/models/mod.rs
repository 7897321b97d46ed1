//! Domain models for the storefront.
//!
//! These are validated domain types, separate from the database row types in
//! `crate::db`. Repositories convert rows into these and report rows that fail
//! validation as data corruption.

pub mod cart;
pub mod checkout;
pub mod hero_banner;
pub mod order;
pub mod product;
pub mod profile;
pub mod session;

pub use cart::{Cart, CartItem};
pub use checkout::{Address, CheckoutSession};
pub use hero_banner::{HeroBanner, HeroBannerInput};
pub use order::{Order, OrderFilter, OrderItem, OrderPage, OrderTotals};
pub use product::{NewProductImage, Product, ProductImage, ProductInput};
pub use profile::Profile;
pub use session::{CurrentUser, keys as session_keys};
