//! Trusted claim set produced by a successful verification

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VerificationError};

/// `aud` claim: RFC 7519 allows a single string or an array of strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct Audience(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Audience {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(aud) => Self(vec![aud]),
            OneOrMany::Many(auds) => Self(auds),
        }
    }
}

impl From<Audience> for Vec<String> {
    fn from(value: Audience) -> Self {
        value.0
    }
}

impl Audience {
    /// Whether `audience` is one of the listed recipients
    pub fn contains(&self, audience: &str) -> bool {
        self.0.iter().any(|a| a == audience)
    }

    /// All listed recipients
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// `true` when the token names no audience at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Claims of a token whose signature, lifetime and schema have been checked
///
/// Instances only come out of [`Verifier::verify`](crate::Verifier::verify);
/// there is deliberately no public constructor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedClaims {
    issuer: String,
    subject: String,
    audience: Audience,
    expires_at: DateTime<Utc>,
    issued_at: Option<DateTime<Utc>>,
    roles: BTreeSet<String>,
    scopes: BTreeSet<String>,
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

/// Shape a verified payload must have
#[derive(Debug, Deserialize)]
pub(crate) struct ClaimSchema {
    iss: String,
    sub: String,
    exp: f64,
    #[serde(default)]
    iat: Option<f64>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default)]
    realm_access: Option<RealmAccess>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl ClaimSchema {
    /// Validate a signature-checked payload against the schema
    pub(crate) fn parse(payload: serde_json::Value) -> Result<Self> {
        let schema: Self = serde_json::from_value(payload)
            .map_err(|e| VerificationError::SchemaViolation(e.to_string()))?;

        if schema.sub.trim().is_empty() {
            return Err(VerificationError::SchemaViolation(
                "empty `sub` claim".to_string(),
            ));
        }
        Ok(schema)
    }

    pub(crate) fn issuer(&self) -> &str {
        &self.iss
    }

    pub(crate) fn into_verified(self) -> Result<VerifiedClaims> {
        let expires_at = timestamp(self.exp, "exp")?;
        let issued_at = self.iat.map(|iat| timestamp(iat, "iat")).transpose()?;

        let mut roles: BTreeSet<String> = self.roles.unwrap_or_default().into_iter().collect();
        if let Some(realm_access) = self.realm_access {
            roles.extend(realm_access.roles);
        }

        let scopes = self
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        Ok(VerifiedClaims {
            issuer: self.iss,
            subject: self.sub,
            audience: self.aud.unwrap_or_default(),
            expires_at,
            issued_at,
            roles,
            scopes,
            extra: self.extra,
        })
    }
}

fn timestamp(seconds: f64, claim: &str) -> Result<DateTime<Utc>> {
    if !seconds.is_finite() {
        return Err(VerificationError::SchemaViolation(format!(
            "`{claim}` is not a finite number"
        )));
    }
    DateTime::from_timestamp(seconds.trunc() as i64, 0).ok_or_else(|| {
        VerificationError::SchemaViolation(format!("`{claim}` is out of range"))
    })
}

impl VerifiedClaims {
    /// `iss`
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// `sub`
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// `aud` (empty when the token has none)
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// `exp`
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `iat`
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Union of top-level `roles` and `realm_access.roles`
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Check role membership
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Space-separated `scope` claim, split
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Any claim not modelled above
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }

    /// All claims not modelled above
    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn audience_accepts_string_or_array() {
        let one: Audience = serde_json::from_value(json!("api")).unwrap();
        let many: Audience = serde_json::from_value(json!(["a", "b"])).unwrap();

        assert!(one.contains("api"));
        assert!(many.contains("b"));
        assert!(!many.contains("c"));
        assert_eq!(many.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn schema_collects_roles_and_scopes() {
        let schema = ClaimSchema::parse(json!({
            "iss": "https://idp.example/realms/main",
            "sub": "user-1",
            "exp": 1_900_000_000,
            "aud": ["account", "todo-api"],
            "roles": ["reader"],
            "realm_access": {"roles": ["admin", "reader"]},
            "scope": "openid profile",
            "preferred_username": "alice"
        }))
        .unwrap();
        let claims = schema.into_verified().unwrap();

        assert_eq!(claims.subject(), "user-1");
        assert_eq!(
            claims.roles().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["admin", "reader"]
        );
        assert!(claims.scopes().contains("profile"));
        assert_eq!(claims.claim("preferred_username"), Some(&json!("alice")));
        assert_eq!(claims.expires_at().timestamp(), 1_900_000_000);
    }

    #[test]
    fn missing_subject_is_schema_violation() {
        let err = ClaimSchema::parse(json!({"iss": "https://idp", "exp": 1})).unwrap_err();
        assert!(matches!(err, VerificationError::SchemaViolation(_)));
    }

    #[test]
    fn wrongly_typed_roles_are_schema_violation() {
        let err = ClaimSchema::parse(json!({
            "iss": "https://idp",
            "sub": "u",
            "exp": 1,
            "realm_access": {"roles": "admin"}
        }))
        .unwrap_err();
        assert!(matches!(err, VerificationError::SchemaViolation(_)));
    }

    #[test]
    fn blank_subject_is_schema_violation() {
        let err = ClaimSchema::parse(json!({"iss": "https://idp", "sub": " ", "exp": 1})).unwrap_err();
        assert!(matches!(err, VerificationError::SchemaViolation(_)));
    }
}
