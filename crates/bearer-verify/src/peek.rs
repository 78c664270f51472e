//! Unverified claim peek
//!
//! Before a token can be verified we must know *which* issuer's keys to verify
//! it with, and the only place that information lives is inside the token
//! itself. This module reads it without trusting it: the result is an
//! [`UnverifiedClaims`] whose only uses are selecting a verifier and picking a
//! key. Nothing here authorizes anything.

use std::fmt::{self, Write as _};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Result, VerificationError};

/// Scheme prefix stripped from the `Authorization` header (case-sensitive)
pub const BEARER_PREFIX: &str = "Bearer ";

/// Length of the hex fingerprint used to correlate log lines
const FINGERPRINT_LEN: usize = 12;

/// The bearer credential as received, stripped of its scheme
///
/// `Debug` prints a fingerprint instead of the token.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken(String);

impl RawToken {
    /// Wrap a compact JWS string
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token text, for handing to the signature check
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix identifying this token in logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut out = String::with_capacity(FINGERPRINT_LEN);
        for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawToken").field(&self.fingerprint()).finish()
    }
}

/// Fields read from a token *before* its signature has been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedClaims {
    issuer: String,
    key_id: Option<String>,
}

impl UnverifiedClaims {
    /// Claimed issuer; a cache key, not a fact
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// `kid` from the JOSE header, if any
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }
}

#[derive(Deserialize)]
struct PeekHeader {
    #[serde(default)]
    kid: Option<String>,
}

/// Split the credential out of an `Authorization` header value and read its
/// claimed issuer
///
/// Policy on the scheme: a leading `Bearer ` is stripped when present. When it
/// is absent the whole value is taken as the token, unless
/// `require_bearer_scheme` is set, in which case the value is rejected as
/// malformed.
///
/// # Errors
///
/// - [`VerificationError::MissingCredential`] if the value is absent or blank
/// - [`VerificationError::MalformedToken`] if the value is not three
///   base64url segments, the header or payload are not JSON objects, or `iss`
///   is missing or not a non-empty string
pub fn peek_issuer(
    header_value: Option<&str>,
    require_bearer_scheme: bool,
) -> Result<(RawToken, UnverifiedClaims)> {
    let value = header_value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != BEARER_PREFIX.trim_end())
        .ok_or(VerificationError::MissingCredential)?;

    let token = match value.strip_prefix(BEARER_PREFIX) {
        Some(rest) => rest.trim(),
        None if require_bearer_scheme => {
            return Err(VerificationError::malformed(
                "authorization value does not use the Bearer scheme",
            ));
        }
        None => value,
    };

    if token.is_empty() {
        return Err(VerificationError::MissingCredential);
    }

    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(VerificationError::malformed(
            "expected three dot-separated segments",
        ));
    };

    let header: PeekHeader = decode_segment(header, "header")?;
    let payload: serde_json::Map<String, serde_json::Value> = decode_segment(payload, "payload")?;

    let issuer = match payload.get("iss") {
        Some(serde_json::Value::String(iss)) if !iss.trim().is_empty() => iss.clone(),
        Some(serde_json::Value::String(_)) => {
            return Err(VerificationError::malformed("empty `iss` claim"));
        }
        Some(_) => return Err(VerificationError::malformed("`iss` claim is not a string")),
        None => return Err(VerificationError::malformed("missing `iss` claim")),
    };

    Ok((
        RawToken::new(token),
        UnverifiedClaims {
            issuer,
            key_id: header.kid,
        },
    ))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, name: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerificationError::malformed(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerificationError::malformed(format!("{name} is not a JSON object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn encode(value: &serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    fn token(payload: serde_json::Value) -> String {
        format!(
            "{}.{}.c2ln",
            encode(&json!({"alg": "RS256", "kid": "k1"})),
            encode(&payload)
        )
    }

    #[test]
    fn peeks_issuer_and_kid() {
        let raw = token(json!({"iss": "https://idp.example/realms/main", "sub": "u"}));
        let header = format!("Bearer {raw}");

        let (token, claims) = peek_issuer(Some(&header), false).unwrap();
        assert_eq!(token.as_str(), raw);
        assert_eq!(claims.issuer(), "https://idp.example/realms/main");
        assert_eq!(claims.key_id(), Some("k1"));
    }

    #[test]
    fn tolerates_missing_scheme_by_default() {
        let raw = token(json!({"iss": "https://idp.example"}));
        let (token, _) = peek_issuer(Some(&raw), false).unwrap();
        assert_eq!(token.as_str(), raw);
    }

    #[test]
    fn strict_scheme_rejects_bare_token() {
        let raw = token(json!({"iss": "https://idp.example"}));
        let err = peek_issuer(Some(&raw), true).unwrap_err();
        assert!(matches!(err, VerificationError::MalformedToken(_)));
    }

    #[test]
    fn scheme_is_case_sensitive() {
        let raw = token(json!({"iss": "https://idp.example"}));
        let err = peek_issuer(Some(&format!("bearer {raw}")), false).unwrap_err();
        assert!(matches!(err, VerificationError::MalformedToken(_)));
    }

    #[test]
    fn absent_or_blank_header_is_missing_credential() {
        assert_eq!(
            peek_issuer(None, false).unwrap_err(),
            VerificationError::MissingCredential
        );
        assert_eq!(
            peek_issuer(Some("   "), false).unwrap_err(),
            VerificationError::MissingCredential
        );
        assert_eq!(
            peek_issuer(Some("Bearer "), false).unwrap_err(),
            VerificationError::MissingCredential
        );
    }

    #[test]
    fn wrong_segment_count_is_malformed() {
        for value in ["abc", "a.b", "a.b.c.d", "Bearer x.y"] {
            let err = peek_issuer(Some(value), false).unwrap_err();
            assert!(matches!(err, VerificationError::MalformedToken(_)), "{value}");
        }
    }

    #[test]
    fn non_json_payload_is_malformed() {
        let value = format!(
            "{}.{}.sig",
            encode(&json!({"alg": "RS256"})),
            URL_SAFE_NO_PAD.encode(b"not json")
        );
        let err = peek_issuer(Some(&value), false).unwrap_err();
        assert!(matches!(err, VerificationError::MalformedToken(_)));
    }

    #[test]
    fn issuer_must_be_a_non_empty_string() {
        for payload in [json!({}), json!({"iss": 42}), json!({"iss": ""})] {
            let err = peek_issuer(Some(&token(payload.clone())), false).unwrap_err();
            assert!(matches!(err, VerificationError::MalformedToken(_)), "{payload}");
        }
    }

    #[test]
    fn debug_hides_the_token() {
        let raw = RawToken::new("secret.token.value");
        let printed = format!("{raw:?}");
        assert!(!printed.contains("secret"));
        assert_eq!(raw.fingerprint().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn fingerprint_is_sha256_hex_prefix() {
        assert_eq!(RawToken::new("abc").fingerprint(), "ba7816bf8f01");
    }

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_input(value in ".*") {
            let _ = peek_issuer(Some(&value), false);
        }

        #[test]
        fn never_panics_on_dotted_garbage(a in "[A-Za-z0-9_-]{0,40}", b in "[A-Za-z0-9_-]{0,40}") {
            let value = format!("Bearer {a}.{b}.sig");
            let err = peek_issuer(Some(&value), false);
            prop_assert!(err.is_err());
        }
    }
}
