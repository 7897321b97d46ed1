//! Checkout session domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use meridian_core::{
    CartId, CheckoutSessionId, CheckoutStep, Email, OrderId, ProfileId, ProviderKind,
};

/// A postal address.
///
/// Stored as JSONB on checkout sessions and orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    /// State, province or region.
    #[serde(default)]
    #[validate(length(max = 100))]
    pub region: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    #[validate(length(equal = 2))]
    pub country: String,
    #[serde(default)]
    #[validate(length(max = 30))]
    pub phone: Option<String>,
}

impl Address {
    /// "First Last".
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A checkout session started from a cart.
///
/// The session moves through the steps as the customer fills in contact,
/// shipping and payment details; once at `confirmation` it is frozen.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: CheckoutSessionId,
    pub cart_id: CartId,
    pub profile_id: Option<ProfileId>,
    pub step: CheckoutStep,
    pub email: Option<Email>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_option_id: Option<String>,
    pub shipping_cost: Option<Decimal>,
    /// Set when a payment intent is created for this session.
    pub payment_intent_id: Option<String>,
    pub payment_provider: Option<ProviderKind>,
    /// Set when the order is placed.
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// A fresh session at the `information` step.
    #[must_use]
    pub fn new(cart_id: CartId, profile_id: Option<ProfileId>, email: Option<Email>) -> Self {
        let now = Utc::now();
        Self {
            id: CheckoutSessionId::new(),
            cart_id,
            profile_id,
            step: CheckoutStep::Information,
            email,
            shipping_address: None,
            billing_address: None,
            shipping_option_id: None,
            shipping_cost: None,
            payment_intent_id: None,
            payment_provider: None,
            order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the session is frozen.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.step.is_terminal()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_address_deserializes_camel_case() {
        let json = r#"{
            "firstName": "Ada",
            "lastName": "Lovelace",
            "line1": "12 St James's Square",
            "city": "London",
            "postalCode": "SW1Y 4JH",
            "country": "GB"
        }"#;

        let address: Address = serde_json::from_str(json).unwrap();
        assert_eq!(address.full_name(), "Ada Lovelace");
        assert!(address.line2.is_none());
        assert!(address.validate().is_ok());
    }

    #[test]
    fn test_address_rejects_long_country() {
        let address = Address {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            line1: "1 Main St".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            region: None,
            postal_code: "12345".to_string(),
            country: "USA".to_string(),
            phone: None,
        };

        let errors = address.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("country"));
    }

    #[test]
    fn test_new_session_starts_at_information() {
        let session = CheckoutSession::new(CartId::new(), None, None);
        assert_eq!(session.step, CheckoutStep::Information);
        assert!(!session.is_confirmed());
        assert!(session.order_id.is_none());
    }
}
