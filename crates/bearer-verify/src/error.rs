//! Error taxonomy for bearer token verification
//!
//! Every failure of the verification pipeline is one [`VerificationError`].
//! The set is closed: callers match on [`VerificationError::kind`] or, more
//! commonly, on [`VerificationError::fault`] to decide between an
//! "unauthenticated" answer and a server fault.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = VerificationError> = std::result::Result<T, E>;

/// Reason a bearer token was rejected
///
/// Variants carry a short detail string for logs. None of them ever embeds the
/// raw token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The `Authorization` header was absent or empty
    #[error("no bearer credential presented")]
    MissingCredential,

    /// The token is not a structurally valid JWS compact serialization
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token names an issuer this service does not accept
    #[error("untrusted issuer: {0}")]
    IssuerUntrusted(String),

    /// Discovery or key fetch failed at the network level (includes timeouts)
    #[error("issuer unreachable: {0}")]
    IssuerUnreachable(String),

    /// The issuer answered, but its discovery document or key set is unusable
    #[error("malformed discovery material: {0}")]
    DiscoveryMalformed(String),

    /// The signature does not verify against the issuer's keys
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// `exp` is at or before the current time
    #[error("token expired at {expired_at}")]
    TokenExpired {
        /// The token's `exp` claim (seconds since the epoch)
        expired_at: i64,
    },

    /// `nbf` lies in the future
    #[error("token not valid before {not_before}")]
    TokenNotYetValid {
        /// The token's `nbf` claim (seconds since the epoch)
        not_before: i64,
    },

    /// A correctly signed token whose claims do not fit the expected schema
    #[error("claim set violates schema: {0}")]
    SchemaViolation(String),

    /// The required audience is not listed in `aud`
    #[error("audience {required:?} not granted by token")]
    AudienceMismatch {
        /// Audience the caller required
        required: String,
    },

    /// The required role is not in the token's role set
    #[error("role {required:?} not granted by token")]
    InsufficientRole {
        /// Role the caller required
        required: String,
    },
}

/// Fieldless discriminant of [`VerificationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`VerificationError::MissingCredential`]
    MissingCredential,
    /// See [`VerificationError::MalformedToken`]
    MalformedToken,
    /// See [`VerificationError::IssuerUntrusted`]
    IssuerUntrusted,
    /// See [`VerificationError::IssuerUnreachable`]
    IssuerUnreachable,
    /// See [`VerificationError::DiscoveryMalformed`]
    DiscoveryMalformed,
    /// See [`VerificationError::InvalidSignature`]
    InvalidSignature,
    /// See [`VerificationError::TokenExpired`]
    TokenExpired,
    /// See [`VerificationError::TokenNotYetValid`]
    TokenNotYetValid,
    /// See [`VerificationError::SchemaViolation`]
    SchemaViolation,
    /// See [`VerificationError::AudienceMismatch`]
    AudienceMismatch,
    /// See [`VerificationError::InsufficientRole`]
    InsufficientRole,
}

impl ErrorKind {
    /// Stable snake_case label, suitable for log fields and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedToken => "malformed_token",
            Self::IssuerUntrusted => "issuer_untrusted",
            Self::IssuerUnreachable => "issuer_unreachable",
            Self::DiscoveryMalformed => "discovery_malformed",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::SchemaViolation => "schema_violation",
            Self::AudienceMismatch => "audience_mismatch",
            Self::InsufficientRole => "insufficient_role",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is to blame for a rejection, and how the transport should answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// The caller did not present a credential we can trust (HTTP 401)
    Unauthenticated,
    /// The credential is valid but does not grant what was required (HTTP 403)
    Forbidden,
    /// The verifying side or its trust infrastructure is broken (HTTP 500)
    Server,
}

impl VerificationError {
    /// Discriminant without payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredential => ErrorKind::MissingCredential,
            Self::MalformedToken(_) => ErrorKind::MalformedToken,
            Self::IssuerUntrusted(_) => ErrorKind::IssuerUntrusted,
            Self::IssuerUnreachable(_) => ErrorKind::IssuerUnreachable,
            Self::DiscoveryMalformed(_) => ErrorKind::DiscoveryMalformed,
            Self::InvalidSignature(_) => ErrorKind::InvalidSignature,
            Self::TokenExpired { .. } => ErrorKind::TokenExpired,
            Self::TokenNotYetValid { .. } => ErrorKind::TokenNotYetValid,
            Self::SchemaViolation(_) => ErrorKind::SchemaViolation,
            Self::AudienceMismatch { .. } => ErrorKind::AudienceMismatch,
            Self::InsufficientRole { .. } => ErrorKind::InsufficientRole,
        }
    }

    /// Classify the failure for the transport layer
    ///
    /// Server faults must never be reported to clients as a plain auth
    /// rejection: they mean discovery is down or the two systems disagree on
    /// the claim schema.
    pub fn fault(&self) -> Fault {
        match self.kind() {
            ErrorKind::IssuerUnreachable
            | ErrorKind::DiscoveryMalformed
            | ErrorKind::SchemaViolation => Fault::Server,
            ErrorKind::AudienceMismatch | ErrorKind::InsufficientRole => Fault::Forbidden,
            ErrorKind::MissingCredential
            | ErrorKind::MalformedToken
            | ErrorKind::IssuerUntrusted
            | ErrorKind::InvalidSignature
            | ErrorKind::TokenExpired
            | ErrorKind::TokenNotYetValid => Fault::Unauthenticated,
        }
    }

    /// `true` when the caller is at fault (401 or 403)
    pub fn is_client_fault(&self) -> bool {
        self.fault() != Fault::Server
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedToken(detail.into())
    }

    pub(crate) fn signature(detail: impl Into<String>) -> Self {
        Self::InvalidSignature(detail.into())
    }

    /// Classify a `jsonwebtoken` failure raised while checking a signature
    pub(crate) fn from_jwt(error: &jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtKind;

        match error.kind() {
            JwtKind::InvalidToken | JwtKind::Base64(_) | JwtKind::Json(_) | JwtKind::Utf8(_) => {
                Self::malformed(error.to_string())
            }
            _ => Self::signature(error.to_string()),
        }
    }
}
