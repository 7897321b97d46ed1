//! Closed status enums and their guard functions.
//!
//! Every status column is stored as `TEXT` holding the snake_case literal.
//! Values are validated with the `is_valid_*` guards (or `FromStr`) before
//! they are written, and values read back that fail the guard are treated
//! as data corruption by the repositories.

use serde::{Deserialize, Serialize};

/// Error returned when a string is not a member of a status set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct InvalidStatus {
    /// Which status set was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Defines a snake_case string enum with `ALL`, `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $lit:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every member of the set, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// The stored string form.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $lit),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($lit => Ok(Self::$variant),)+
                    _ => Err(InvalidStatus {
                        kind: $kind,
                        value: s.to_owned(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Lifecycle status of an order.
    OrderStatus, "order status" {
        Pending => "pending",
        Processing => "processing",
        Paid => "paid",
        Completed => "completed",
        Cancelled => "cancelled",
        Refunded => "refunded",
        Failed => "failed",
        Created => "created",
        Shipped => "shipped",
        Delivered => "delivered",
        PaymentFailed => "payment_failed",
    }
}

string_enum! {
    /// Payment status of an order, normalized across providers.
    PaymentStatus, "payment status" {
        Pending => "pending",
        Processing => "processing",
        Paid => "paid",
        Failed => "failed",
        Refunded => "refunded",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// Status of a shopping cart.
    CartStatus, "cart status" {
        /// Open for edits.
        Active => "active",
        /// Folded into another cart (guest cart after sign-in).
        Merged => "merged",
        /// A checkout session has been started from this cart.
        Checkout => "checkout",
        /// An order was placed from this cart.
        Completed => "completed",
        Abandoned => "abandoned",
        Duplicate => "duplicate",
        Cleared => "cleared",
        Consolidated => "consolidated",
    }
}

string_enum! {
    /// Step of a checkout session.
    CheckoutStep, "checkout step" {
        Information => "information",
        Shipping => "shipping",
        Payment => "payment",
        Review => "review",
        Confirmation => "confirmation",
    }
}

string_enum! {
    /// Role attached to a profile.
    UserRole, "user role" {
        Customer => "customer",
        Business => "business",
        Admin => "admin",
    }
}

string_enum! {
    /// Payment vendors the store can be configured with.
    ProviderKind, "payment provider" {
        Square => "square",
        Stripe => "stripe",
    }
}

impl PaymentStatus {
    /// Whether a verification returning this status allows an order to be placed.
    ///
    /// `Processing` covers authorized-but-not-captured payments.
    #[must_use]
    pub const fn is_successful(self) -> bool {
        matches!(self, Self::Paid | Self::Processing)
    }
}

impl OrderStatus {
    /// Initial order status for a freshly placed order with the given payment status.
    #[must_use]
    pub const fn for_new_order(payment: PaymentStatus) -> Self {
        match payment {
            PaymentStatus::Paid => Self::Paid,
            PaymentStatus::Processing => Self::Processing,
            PaymentStatus::Pending => Self::Pending,
            PaymentStatus::Failed => Self::PaymentFailed,
            PaymentStatus::Refunded => Self::Refunded,
            PaymentStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl CartStatus {
    /// Items may only be changed while the cart is active or in checkout.
    #[must_use]
    pub const fn is_mutable(self) -> bool {
        matches!(self, Self::Active | Self::Checkout)
    }
}

impl CheckoutStep {
    /// `Confirmation` is terminal: the session accepts no further changes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmation)
    }
}

impl Default for CartStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl Default for CheckoutStep {
    fn default() -> Self {
        Self::Information
    }
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Customer
    }
}

/// Returns true if `s` is one of the order status literals.
#[must_use]
pub fn is_valid_order_status(s: &str) -> bool {
    s.parse::<OrderStatus>().is_ok()
}

/// Returns true if `s` is one of the payment status literals.
#[must_use]
pub fn is_valid_payment_status(s: &str) -> bool {
    s.parse::<PaymentStatus>().is_ok()
}

/// Returns true if `s` is one of the cart status literals.
#[must_use]
pub fn is_valid_cart_status(s: &str) -> bool {
    s.parse::<CartStatus>().is_ok()
}

/// Returns true if `s` is one of the checkout step literals.
#[must_use]
pub fn is_valid_checkout_step(s: &str) -> bool {
    s.parse::<CheckoutStep>().is_ok()
}

/// Returns true if `s` is one of the user role literals.
#[must_use]
pub fn is_valid_user_role(s: &str) -> bool {
    s.parse::<UserRole>().is_ok()
}
