//! Webhook signature verification.
//!
//! - Stripe signs `"{timestamp}.{body}"` and sends `Stripe-Signature: t=..,v1=..`
//!   with a hex HMAC-SHA256. Deliveries older than [`STRIPE_TOLERANCE_SECS`] are
//!   rejected.
//! - Square signs `notification_url + body` and sends the base64 HMAC-SHA256 in
//!   `x-square-hmacsha256-signature`.
//!
//! Comparisons go through `Mac::verify_slice`, which is constant time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use sha2::Sha256;

use super::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying Stripe's signature.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Header carrying Square's signature.
pub const SQUARE_SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";

/// Maximum age of a Stripe delivery, in seconds.
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

fn mac(secret: &str) -> Result<HmacSha256, PaymentError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::InvalidSignature("unusable signing secret".to_string()))
}

/// Read a header as UTF-8, failing with `InvalidSignature` when absent.
pub fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, PaymentError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {name} header")))
}

/// Verify a `Stripe-Signature` header against `body`.
///
/// `now` is the current Unix time in seconds.
///
/// # Errors
///
/// Returns `InvalidSignature` if the header is malformed, the timestamp is
/// outside the tolerance window, or no `v1` signature matches.
pub fn verify_stripe_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    now: i64,
) -> Result<(), PaymentError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
    let issued_at: i64 = timestamp
        .parse()
        .map_err(|_| PaymentError::InvalidSignature("malformed timestamp".to_string()))?;
    if now.abs_diff(issued_at) > STRIPE_TOLERANCE_SECS.unsigned_abs() {
        return Err(PaymentError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature("no v1 signature".to_string()));
    }

    let mut signed = mac(secret)?;
    signed.update(timestamp.as_bytes());
    signed.update(b".");
    signed.update(body);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate).is_ok_and(|bytes| signed.clone().verify_slice(&bytes).is_ok())
    });
    if matched {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature("signature mismatch".to_string()))
    }
}

/// Verify Square's base64 signature over `notification_url + body`.
///
/// # Errors
///
/// Returns `InvalidSignature` if the signature is not base64 or does not match.
pub fn verify_square_signature(
    signature: &str,
    notification_url: &str,
    body: &[u8],
    key: &str,
) -> Result<(), PaymentError> {
    let expected = BASE64
        .decode(signature.trim())
        .map_err(|_| PaymentError::InvalidSignature("signature is not base64".to_string()))?;

    let mut signed = mac(key)?;
    signed.update(notification_url.as_bytes());
    signed.update(body);
    signed
        .verify_slice(&expected)
        .map_err(|_| PaymentError::InvalidSignature("signature mismatch".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    const SECRET: &str = "whsec_kR8vQ2mZt5LpX9cN3wYb";

    pub(crate) fn stripe_header(body: &[u8], secret: &str, timestamp: i64) -> String {
        let mut signed = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        signed.update(format!("{timestamp}.").as_bytes());
        signed.update(body);
        let sig = hex::encode(signed.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    pub(crate) fn square_signature(url: &str, body: &[u8], key: &str) -> String {
        let mut signed = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        signed.update(url.as_bytes());
        signed.update(body);
        BASE64.encode(signed.finalize().into_bytes())
    }

    #[test]
    fn test_stripe_signature_accepts_valid() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = stripe_header(body, SECRET, 1_700_000_000);
        assert!(verify_stripe_signature(&header, body, SECRET, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_stripe_signature_accepts_any_matching_v1() {
        let body = b"{}";
        let good = stripe_header(body, SECRET, 1_700_000_000);
        let header = format!("{good},v1=00ff");
        assert!(verify_stripe_signature(&header, body, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_stripe_signature_rejects_stale() {
        let body = b"{}";
        let header = stripe_header(body, SECRET, 1_700_000_000);
        let err = verify_stripe_signature(&header, body, SECRET, 1_700_000_301).unwrap_err();
        assert!(err.to_string().contains("tolerance"));
    }

    #[test]
    fn test_stripe_signature_rejects_extreme_timestamps() {
        for t in [i64::MIN, i64::MAX, -1] {
            let header = format!("t={t},v1=00");
            let err = verify_stripe_signature(&header, b"{}", SECRET, 1_760_000_000).unwrap_err();
            assert!(err.to_string().contains("tolerance"), "{t}: {err}");
        }
        let header = format!("t={},v1=00", i64::MAX);
        assert!(verify_stripe_signature(&header, b"{}", SECRET, i64::MIN).is_err());
    }

    #[test]
    fn test_stripe_signature_rejects_tampered_body() {
        let header = stripe_header(b"{}", SECRET, 1_700_000_000);
        assert!(verify_stripe_signature(&header, b"{\"x\":1}", SECRET, 1_700_000_000).is_err());
    }

    #[test]
    fn test_stripe_signature_rejects_malformed() {
        assert!(verify_stripe_signature("garbage", b"{}", SECRET, 0).is_err());
        assert!(verify_stripe_signature("t=abc,v1=00", b"{}", SECRET, 0).is_err());
        assert!(verify_stripe_signature("t=0", b"{}", SECRET, 0).is_err());
    }

    #[test]
    fn test_square_signature() {
        let url = "https://shop.meridian.example/api/payment/webhook/square";
        let body = br#"{"type":"payment.updated"}"#;
        let sig = square_signature(url, body, SECRET);

        assert!(verify_square_signature(&sig, url, body, SECRET).is_ok());
        assert!(verify_square_signature(&sig, "https://other.example", body, SECRET).is_err());
        assert!(verify_square_signature("not base64!", url, body, SECRET).is_err());
    }

    #[test]
    fn test_required_header() {
        let mut headers = HeaderMap::new();
        assert!(required_header(&headers, STRIPE_SIGNATURE_HEADER).is_err());
        headers.insert(STRIPE_SIGNATURE_HEADER, "t=1".parse().unwrap());
        assert_eq!(required_header(&headers, STRIPE_SIGNATURE_HEADER).unwrap(), "t=1");
    }
}
