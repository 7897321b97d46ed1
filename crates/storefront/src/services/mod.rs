//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `cart` - Carts and line items
//! - `checkout` - Checkout sessions and step advancement
//! - `orders` - Order placement, webhooks and admin order actions
//! - `catalog` - Cached product and hero banner reads, admin CRUD
//! - `shipping` - Shipping options and rates
//! - `media` - Product image processing and upload
//! - `storage` - Object storage client

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod media;
pub mod orders;
pub mod shipping;
pub mod storage;

pub use cart::{CartError, CartService};
pub use catalog::CatalogService;
pub use checkout::{CheckoutError, CheckoutInformation, CheckoutService};
pub use media::{MediaError, MediaService};
pub use orders::{OrderError, OrderService, PlaceOrder, PlacedOrder};
pub use shipping::{ShippingOption, ShippingService};
pub use storage::{HttpObjectStorage, ObjectStorage, StorageError, UnconfiguredStorage};
