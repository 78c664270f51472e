//! Signing key material for one issuer

use std::fmt;

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::Jwk;
use tracing::{debug, warn};

use crate::source::FetchError;

/// One verification key from an issuer's key set
#[derive(Clone)]
pub struct SigningKey {
    key_id: Option<String>,
    key: DecodingKey,
}

impl SigningKey {
    /// Wrap an already constructed decoding key
    pub fn new(key_id: Option<String>, key: DecodingKey) -> Self {
        Self { key_id, key }
    }

    /// `kid` of this key, if published
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print key material
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Verification keys published by one issuer
///
/// Immutable once built; a refresh replaces the whole value.
#[derive(Debug, Clone)]
pub struct IssuerKeyMaterial {
    issuer: String,
    keys: Vec<SigningKey>,
}

impl IssuerKeyMaterial {
    /// Build from explicit keys
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Malformed`] if `keys` is empty.
    pub fn new(issuer: impl Into<String>, keys: Vec<SigningKey>) -> Result<Self, FetchError> {
        let issuer = issuer.into();
        if keys.is_empty() {
            return Err(FetchError::Malformed(format!(
                "no usable signing keys published for {issuer}"
            )));
        }
        Ok(Self { issuer, keys })
    }

    /// Build from a JWKS document (`{"keys": [...]}`)
    ///
    /// Keys whose `use` is something other than `sig`, and keys
    /// `jsonwebtoken` cannot turn into a verification key (unknown `kty`,
    /// encryption-only algorithms, broken parameters), are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Malformed`] if the document has no `keys` array
    /// or no usable signing key remains.
    pub fn from_jwks(issuer: impl Into<String>, jwks: &serde_json::Value) -> Result<Self, FetchError> {
        let issuer = issuer.into();
        let entries = jwks
            .get("keys")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| FetchError::Malformed("JWKS has no `keys` array".to_string()))?;

        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.get("use").and_then(serde_json::Value::as_str) {
                None | Some("sig") => {}
                Some(other) => {
                    debug!(issuer = %issuer, key_use = other, "Skipping non-signing JWK");
                    continue;
                }
            }

            let jwk: Jwk = match serde_json::from_value(entry.clone()) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!(issuer = %issuer, error = %e, "Skipping unparseable JWK");
                    continue;
                }
            };

            match DecodingKey::from_jwk(&jwk) {
                Ok(key) => keys.push(SigningKey::new(jwk.common.key_id.clone(), key)),
                Err(e) => {
                    warn!(
                        issuer = %issuer,
                        key_id = ?jwk.common.key_id,
                        error = %e,
                        "Skipping JWK that cannot verify signatures"
                    );
                }
            }
        }

        Self::new(issuer, keys)
    }

    /// Canonical issuer identifier these keys belong to
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always `false`; material is never built without keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Published key ids
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().filter_map(SigningKey::key_id)
    }

    /// Select the key for a token header
    ///
    /// With a `kid`, only an exact match is returned. Without one, the key is
    /// unambiguous only if the issuer publishes exactly one.
    pub fn find(&self, key_id: Option<&str>) -> Option<&SigningKey> {
        match key_id {
            Some(kid) => self.keys.iter().find(|k| k.key_id() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }
}
