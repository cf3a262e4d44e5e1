//! Webhook signature verification.
//!
//! The provider signs `"{timestamp}.{body}"` with HMAC-SHA256 using the
//! shared webhook secret. Verification recomputes that signature, compares in
//! constant time, and rejects timestamps outside the tolerance window so a
//! captured request cannot be replayed later.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum age for webhook events (5 minutes).
const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Maximum allowed clock skew for future events (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Timestamp and signature extracted from request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when the signature was generated.
    pub timestamp: i64,
    /// Every v1 signature (HMAC-SHA256) sent. The provider sends more than
    /// one while a secret is being rolled; any match is accepted.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses a combined signature header.
    ///
    /// Format: `t=<timestamp>,v1=<signature>[,v1=<signature>...][,v0=<legacy>]`.
    /// Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::ParseError` if the header format is invalid.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| WebhookError::ParseError("invalid header format".to_string()))?;

            match key {
                "t" => timestamp = Some(parse_timestamp(value)?),
                "v1" => v1_signatures.push(decode_signature(value)?),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::ParseError("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::ParseError("missing v1 signature".to_string()));
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }

    /// Builds the header from separate signature and timestamp values.
    ///
    /// The signature header holds one or more comma-separated signatures,
    /// each bare hex or prefixed with `v1=`.
    pub fn from_parts(signature: &str, timestamp: &str) -> Result<Self, WebhookError> {
        let v1_signatures = signature
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| decode_signature(s.strip_prefix("v1=").unwrap_or(s)))
            .collect::<Result<Vec<_>, _>>()?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::ParseError("missing v1 signature".to_string()));
        }
        Ok(Self {
            timestamp: parse_timestamp(timestamp)?,
            v1_signatures,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<i64, WebhookError> {
    value
        .trim()
        .parse()
        .map_err(|_| WebhookError::ParseError("invalid timestamp".to_string()))
}

fn decode_signature(value: &str) -> Result<Vec<u8>, WebhookError> {
    hex::decode(value.trim())
        .map_err(|_| WebhookError::ParseError("invalid signature hex".to_string()))
}

/// Verifier for provider webhook signatures.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    /// Creates a verifier with the default 300s tolerance window.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Overrides the tolerance window.
    pub fn with_tolerance_secs(mut self, secs: u64) -> Self {
        self.tolerance_secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self
    }

    /// Verifies the parsed header against `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// - `StaleEvent` - older than the tolerance window, or dated in the
    ///   future beyond the allowed clock skew
    /// - `InvalidSignature` - no signature matches
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: &SignatureHeader,
        now: i64,
    ) -> Result<(), WebhookError> {
        let age = now.saturating_sub(header.timestamp);

        if age > self.tolerance_secs {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                age_secs = age,
                "Webhook event too old - possible replay"
            );
            return Err(WebhookError::StaleEvent(format!("event is {}s old", age)));
        }

        if age < -MAX_CLOCK_SKEW_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                "Webhook event dated in the future"
            );
            return Err(WebhookError::StaleEvent(format!(
                "event is {}s in the future",
                -age
            )));
        }

        let expected = compute_signature(
            self.secret.expose_secret().as_bytes(),
            header.timestamp,
            payload,
        )?;

        // Compare every candidate so timing does not reveal which one matched.
        let matched = header
            .v1_signatures
            .iter()
            .fold(false, |found, candidate| {
                constant_time_compare(&expected, candidate) | found
            });
        if !matched {
            tracing::warn!(event_timestamp = header.timestamp, "Invalid webhook signature");
            return Err(WebhookError::InvalidSignature);
        }

        Ok(())
    }
}

/// Computes the HMAC-SHA256 for the given timestamp and payload.
fn compute_signature(secret: &[u8], timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| WebhookError::ParseError("unusable webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Hex signature for `payload` at `timestamp`, as the provider would send it.
///
/// Used to produce signed fixtures for tests and local replay tooling.
pub fn compute_signature_hex(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    compute_signature(secret.as_bytes(), timestamp, payload)
        .map(hex::encode)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "whsec_test_secret_12345";
    const NOW: i64 = 1_700_000_000;
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed"}"#;

    fn signed_header(timestamp: i64, payload: &[u8]) -> SignatureHeader {
        let signature = compute_signature_hex(TEST_SECRET, timestamp, payload);
        SignatureHeader::from_parts(&signature, &timestamp.to_string()).unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Header Parsing Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parse_combined_header() {
        let header_str = format!("t=1234567890,v1={}", "a".repeat(64));
        let header = SignatureHeader::parse(&header_str).unwrap();
        assert_eq!(header.timestamp, 1234567890);
        assert_eq!(header.v1_signatures.len(), 1);
        assert_eq!(header.v1_signatures[0].len(), 32);
    }

    #[test]
    fn parse_header_keeps_every_v1_signature() {
        let header_str = format!("t=1,v1={},v1={}", "a".repeat(64), "b".repeat(64));
        let header = SignatureHeader::parse(&header_str).unwrap();
        assert_eq!(header.v1_signatures.len(), 2);
        assert_eq!(header.v1_signatures[1], vec![0xbb; 32]);
    }

    #[test]
    fn parse_header_ignores_unknown_fields() {
        let header_str = format!("t=1,v1={},v0={},scheme=hmac", "a".repeat(64), "b".repeat(64));
        assert!(SignatureHeader::parse(&header_str).is_ok());
    }

    #[test]
    fn parse_header_missing_v1_fails() {
        assert!(matches!(
            SignatureHeader::parse("t=1234567890"),
            Err(WebhookError::ParseError(_))
        ));
    }

    #[test]
    fn from_parts_accepts_prefixed_signature() {
        let header = SignatureHeader::from_parts(&format!("v1={}", "ab".repeat(32)), "42").unwrap();
        assert_eq!(header.timestamp, 42);
        assert_eq!(header.v1_signatures, vec![vec![0xab; 32]]);
    }

    #[test]
    fn from_parts_rejects_non_numeric_timestamp() {
        assert!(matches!(
            SignatureHeader::from_parts(&"ab".repeat(32), "yesterday"),
            Err(WebhookError::ParseError(_))
        ));
    }

    // ══════════════════════════════════════════════════════════════
    // Verification Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn valid_signature_is_accepted() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let header = signed_header(NOW, PAYLOAD);
        assert_eq!(verifier.verify_at(PAYLOAD, &header, NOW + 10), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let header = signed_header(NOW, PAYLOAD);
        let tampered = br#"{"id":"evt_1","type":"invoice.paid"}"#;
        assert_eq!(
            verifier.verify_at(tampered, &header, NOW),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = WebhookVerifier::new("whsec_other");
        let header = signed_header(NOW, PAYLOAD);
        assert_eq!(
            verifier.verify_at(PAYLOAD, &header, NOW),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn event_older_than_tolerance_is_stale() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let header = signed_header(NOW - 301, PAYLOAD);
        assert!(matches!(
            verifier.verify_at(PAYLOAD, &header, NOW),
            Err(WebhookError::StaleEvent(_))
        ));
    }

    #[test]
    fn event_at_tolerance_boundary_is_accepted() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let header = signed_header(NOW - 300, PAYLOAD);
        assert!(verifier.verify_at(PAYLOAD, &header, NOW).is_ok());
    }

    #[test]
    fn custom_tolerance_is_honoured() {
        let verifier = WebhookVerifier::new(TEST_SECRET).with_tolerance_secs(30);
        let header = signed_header(NOW - 31, PAYLOAD);
        assert!(matches!(
            verifier.verify_at(PAYLOAD, &header, NOW),
            Err(WebhookError::StaleEvent(_))
        ));
    }

    #[test]
    fn future_event_beyond_skew_is_stale() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let header = signed_header(NOW + 61, PAYLOAD);
        assert!(matches!(
            verifier.verify_at(PAYLOAD, &header, NOW),
            Err(WebhookError::StaleEvent(_))
        ));
    }

    #[test]
    fn future_event_within_skew_is_accepted() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let header = signed_header(NOW + 30, PAYLOAD);
        assert!(verifier.verify_at(PAYLOAD, &header, NOW).is_ok());
    }

    #[test]
    fn truncated_signature_is_rejected() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let mut header = signed_header(NOW, PAYLOAD);
        header.v1_signatures[0].truncate(16);
        assert_eq!(
            verifier.verify_at(PAYLOAD, &header, NOW),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn any_matching_signature_during_secret_rotation_is_accepted() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let current = compute_signature_hex(TEST_SECRET, NOW, PAYLOAD);
        let retired = compute_signature_hex("whsec_retired", NOW, PAYLOAD);

        let combined = SignatureHeader::parse(&format!("t={},v1={},v1={}", NOW, retired, current))
            .unwrap();
        assert!(verifier.verify_at(PAYLOAD, &combined, NOW).is_ok());

        let split = SignatureHeader::from_parts(&format!("{},{}", retired, current), &NOW.to_string())
            .unwrap();
        assert!(verifier.verify_at(PAYLOAD, &split, NOW).is_ok());
    }

    #[test]
    fn no_matching_signature_is_rejected() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let first = compute_signature_hex("whsec_a", NOW, PAYLOAD);
        let second = compute_signature_hex("whsec_b", NOW, PAYLOAD);
        let header = SignatureHeader::parse(&format!("t={},v1={},v1={}", NOW, first, second))
            .unwrap();
        assert_eq!(
            verifier.verify_at(PAYLOAD, &header, NOW),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn from_parts_without_signature_fails() {
        assert!(matches!(
            SignatureHeader::from_parts(" , ", "42"),
            Err(WebhookError::ParseError(_))
        ));
    }
}
