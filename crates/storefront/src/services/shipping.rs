//! Shipping options and rates.

use rust_decimal::Decimal;
use serde::Serialize;

/// A shipping option with its rate for a given subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOption {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub price: Decimal,
    /// Business days, inclusive range.
    pub min_days: u8,
    pub max_days: u8,
}

struct Rate {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    cents: i64,
    min_days: u8,
    max_days: u8,
    /// Whether the free-shipping threshold applies.
    free_over_threshold: bool,
}

const RATES: &[Rate] = &[
    Rate {
        id: "standard",
        name: "Standard",
        description: "USPS Ground Advantage",
        cents: 595,
        min_days: 3,
        max_days: 7,
        free_over_threshold: true,
    },
    Rate {
        id: "expedited",
        name: "Expedited",
        description: "USPS Priority Mail",
        cents: 1295,
        min_days: 2,
        max_days: 3,
        free_over_threshold: false,
    },
    Rate {
        id: "overnight",
        name: "Overnight",
        description: "UPS Next Day Air",
        cents: 2995,
        min_days: 1,
        max_days: 1,
        free_over_threshold: false,
    },
];

/// Fixed shipping catalog with a free-standard-shipping threshold.
#[derive(Debug, Clone)]
pub struct ShippingService {
    free_shipping_threshold: Decimal,
}

impl ShippingService {
    #[must_use]
    pub const fn new(free_shipping_threshold: Decimal) -> Self {
        Self {
            free_shipping_threshold,
        }
    }

    /// Every option, priced for `subtotal`.
    #[must_use]
    pub fn options(&self, subtotal: Decimal) -> Vec<ShippingOption> {
        RATES.iter().map(|rate| self.price(rate, subtotal)).collect()
    }

    /// One option by id, priced for `subtotal`.
    #[must_use]
    pub fn option(&self, id: &str, subtotal: Decimal) -> Option<ShippingOption> {
        RATES
            .iter()
            .find(|rate| rate.id == id)
            .map(|rate| self.price(rate, subtotal))
    }

    fn price(&self, rate: &Rate, subtotal: Decimal) -> ShippingOption {
        let free = rate.free_over_threshold && subtotal >= self.free_shipping_threshold;
        ShippingOption {
            id: rate.id,
            name: rate.name,
            description: rate.description,
            price: if free {
                Decimal::ZERO
            } else {
                Decimal::new(rate.cents, 2)
            },
            min_days: rate.min_days,
            max_days: rate.max_days,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_free_at_threshold() {
        let shipping = ShippingService::new(Decimal::new(7500, 2));

        let below = shipping.option("standard", Decimal::new(7499, 2)).unwrap();
        assert_eq!(below.price, Decimal::new(595, 2));

        let at = shipping.option("standard", Decimal::new(7500, 2)).unwrap();
        assert_eq!(at.price, Decimal::ZERO);

        let expedited = shipping.option("expedited", Decimal::new(20000, 2)).unwrap();
        assert_eq!(expedited.price, Decimal::new(1295, 2));
    }

    #[test]
    fn test_unknown_option() {
        let shipping = ShippingService::new(Decimal::ZERO);
        assert!(shipping.option("teleport", Decimal::ONE).is_none());
        assert_eq!(shipping.options(Decimal::ONE).len(), 3);
    }
}
