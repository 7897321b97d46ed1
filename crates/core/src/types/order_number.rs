//! Human-readable order numbers.

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;

/// Characters used for the random suffix (no 0/O or 1/I to keep numbers readable over the phone).
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of the random suffix.
const SUFFIX_LEN: usize = 6;

/// Generate an order number of the form `ORD-YYYYMMDD-XXXXXX`.
///
/// The database carries a unique index on `order_number`; a collision
/// surfaces as a repository conflict rather than a silent duplicate.
#[must_use]
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .filter_map(|_| SUFFIX_ALPHABET.choose(&mut rng).map(|b| char::from(*b)))
        .collect();
    format!("ORD-{}-{suffix}", now.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_order_number_shape() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).single().unwrap_or_default();
        let number = generate_order_number(now);

        assert!(number.starts_with("ORD-20260309-"));
        let suffix = number.trim_start_matches("ORD-20260309-");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
    }
}
