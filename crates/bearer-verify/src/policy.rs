//! Post-verification claim policy
//!
//! Applied after the signature has been checked, identically for every
//! issuer. Audience is checked before role.

use serde::{Deserialize, Serialize};

use crate::claims::VerifiedClaims;
use crate::error::{Result, VerificationError};

/// Per-call requirements for [`Authenticator::verify_access_token`](crate::Authenticator::verify_access_token)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Audience that must appear in `aud`
    #[serde(default)]
    pub required_audience: Option<String>,
    /// Role that must appear in the role set
    #[serde(default)]
    pub required_role: Option<String>,
}

impl VerifyOptions {
    /// No requirements beyond a valid token
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `audience`
    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.required_audience = Some(audience.into());
        self
    }

    /// Require `role`
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }
}

/// Check audience and role membership
///
/// # Errors
///
/// - [`VerificationError::AudienceMismatch`] if `required_audience` is not in `aud`
/// - [`VerificationError::InsufficientRole`] if `required_role` is not granted
pub fn apply_policy(
    claims: VerifiedClaims,
    required_audience: Option<&str>,
    required_role: Option<&str>,
) -> Result<VerifiedClaims> {
    if let Some(required) = required_audience
        && !claims.audience().contains(required)
    {
        return Err(VerificationError::AudienceMismatch {
            required: required.to_string(),
        });
    }

    if let Some(required) = required_role
        && !claims.has_role(required)
    {
        return Err(VerificationError::InsufficientRole {
            required: required.to_string(),
        });
    }

    Ok(claims)
}
