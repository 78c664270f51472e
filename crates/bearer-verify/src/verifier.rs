//! Per-issuer token verification
//!
//! A [`Verifier`] owns one issuer's [`IssuerKeyMaterial`] and turns a
//! [`RawToken`] into [`VerifiedClaims`]: signature first, then lifetime, then
//! claim schema. It does no I/O and never blocks, so it is shared behind an
//! `Arc` by every request that names its issuer.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use tracing::trace;

use crate::claims::{ClaimSchema, VerifiedClaims};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, VerificationError};
use crate::material::IssuerKeyMaterial;
use crate::peek::RawToken;

/// Asymmetric algorithms accepted unless configured otherwise
///
/// HMAC is absent: a shared secret cannot come from a public key set.
pub const DEFAULT_ALGORITHMS: [Algorithm; 9] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Knobs shared by every verifier a cache builds
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    clock: Arc<dyn Clock>,
    leeway: Duration,
    algorithms: Vec<Algorithm>,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            leeway: Duration::ZERO,
            algorithms: DEFAULT_ALGORITHMS.to_vec(),
        }
    }
}

impl VerifierSettings {
    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Tolerance added to `exp` and `nbf` comparisons
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Accepted header algorithms
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Time source in use
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Verifies tokens minted by one issuer
#[derive(Debug)]
pub struct Verifier {
    material: IssuerKeyMaterial,
    settings: VerifierSettings,
}

impl Verifier {
    /// Create a verifier over `material`
    pub fn new(material: IssuerKeyMaterial, settings: VerifierSettings) -> Self {
        Self { material, settings }
    }

    /// Issuer this verifier holds keys for
    pub fn issuer(&self) -> &str {
        self.material.issuer()
    }

    /// Key material in use
    pub fn material(&self) -> &IssuerKeyMaterial {
        &self.material
    }

    /// Whether a token with header `kid` would find a key here
    pub fn has_key(&self, key_id: Option<&str>) -> bool {
        self.material.find(key_id).is_some()
    }

    /// Verify signature, lifetime and claim schema
    ///
    /// Expiry is inclusive: a token whose `exp` equals the current second is
    /// already expired.
    ///
    /// # Errors
    ///
    /// - [`VerificationError::MalformedToken`] if the JOSE header is unreadable
    /// - [`VerificationError::InvalidSignature`] if the algorithm is not
    ///   accepted, no key matches, the signature does not verify, or the
    ///   signed `iss` is not this verifier's issuer
    /// - [`VerificationError::TokenExpired`] / [`VerificationError::TokenNotYetValid`]
    /// - [`VerificationError::SchemaViolation`] if the signed claims lack `sub`,
    ///   `iss` or `exp`, or have wrongly typed fields
    pub fn verify(&self, token: &RawToken) -> Result<VerifiedClaims> {
        let header = decode_header(token.as_str()).map_err(|e| VerificationError::from_jwt(&e))?;

        if !self.settings.algorithms.contains(&header.alg) {
            return Err(VerificationError::signature(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let key = self.material.find(header.kid.as_deref()).ok_or_else(|| {
            VerificationError::signature(match &header.kid {
                Some(kid) => format!("no key {kid:?} published by {}", self.issuer()),
                None => format!("token has no kid and {} publishes several keys", self.issuer()),
            })
        })?;

        // Lifetime and audience are checked below against the injected clock
        // and by the policy step; jsonwebtoken only checks the signature.
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let payload = decode::<serde_json::Value>(token.as_str(), key.decoding_key(), &validation)
            .map_err(|e| VerificationError::from_jwt(&e))?
            .claims;

        self.check_lifetime(&payload)?;

        let schema = ClaimSchema::parse(payload)?;
        if schema.issuer() != self.issuer() {
            return Err(VerificationError::signature(format!(
                "token signed for {:?} by keys of {}",
                schema.issuer(),
                self.issuer()
            )));
        }

        let claims = schema.into_verified()?;
        trace!(issuer = self.issuer(), subject = claims.subject(), "Token verified");
        Ok(claims)
    }

    fn check_lifetime(&self, payload: &serde_json::Value) -> Result<()> {
        let now = self.settings.clock.unix_seconds();
        let leeway = i64::try_from(self.settings.leeway.as_secs()).unwrap_or(i64::MAX);

        // Missing or non-numeric values are left to the schema check
        if let Some(exp) = payload.get("exp").and_then(numeric_date)
            && exp.saturating_add(leeway) <= now
        {
            return Err(VerificationError::TokenExpired { expired_at: exp });
        }

        if let Some(nbf) = payload.get("nbf").and_then(numeric_date)
            && nbf > now.saturating_add(leeway)
        {
            return Err(VerificationError::TokenNotYetValid { not_before: nbf });
        }

        Ok(())
    }
}

/// RFC 7519 NumericDate, truncated to whole seconds
fn numeric_date(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
        .or_else(|| {
            value
                .as_f64()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_dates() {
        assert_eq!(numeric_date(&json!(10)), Some(10));
        assert_eq!(numeric_date(&json!(10.9)), Some(10));
        assert_eq!(numeric_date(&json!(u64::MAX)), Some(i64::MAX));
        assert_eq!(numeric_date(&json!("10")), None);
    }

    #[test]
    fn default_algorithms_exclude_hmac() {
        let settings = VerifierSettings::default();
        assert!(!settings.algorithms.contains(&Algorithm::HS256));
        assert!(settings.algorithms.contains(&Algorithm::RS256));
        assert_eq!(settings.leeway, Duration::ZERO);
    }
}
