//! # Bearer Verify - Multi-Issuer Bearer Token Verification
//!
//! Authenticates `Authorization: Bearer <jwt>` headers for an API that
//! accepts tokens from more than one issuer. The issuer named inside the
//! token selects which keys verify it; keys are discovered on first use and
//! shared by every later request.
//!
//! ## Pipeline
//!
//! 1. [`peek_issuer`] reads `iss` and `kid` without trusting them
//!    ([`UnverifiedClaims`])
//! 2. [`IssuerVerifierCache::get_or_build`] returns the issuer's [`Verifier`],
//!    running at most one discovery per issuer at a time
//! 3. [`Verifier::verify`] checks signature, `exp` / `nbf` and the claim schema,
//!    producing [`VerifiedClaims`]
//! 4. [`apply_policy`] checks the required audience and role
//!
//! [`Authenticator::verify_access_token`] runs all four. Failures are one
//! [`VerificationError`]; [`VerificationError::fault`] says whether to answer
//! 401, 403 or 500.
//!
//! ## Architecture
//!
//! - [`error`] - Closed error taxonomy and fault classification
//! - [`config`] - [`AuthenticatorConfig`], loadable from `AUTH_*` variables
//! - [`clock`] - Injected time source ([`SystemClock`], [`ManualClock`])
//! - [`peek`] - Unverified issuer peek
//! - [`claims`] - Verified claim set
//! - [`material`] - Per-issuer signing keys
//! - [`source`] - Key discovery ([`HttpKeySource`], [`StaticKeySource`])
//! - [`verifier`] - Per-issuer verification
//! - [`cache`] - Issuer → verifier cache with single-flight construction
//! - [`policy`] - Audience / role checks
//! - `middleware` - Tower layer (feature `middleware`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bearer_verify::{Authenticator, AuthenticatorConfig, VerifyOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthenticatorConfig::default()
//!     .with_trusted_issuer("https://sso.example.com/realms/main");
//! let authenticator = Authenticator::from_config(config)?;
//!
//! let claims = authenticator
//!     .verify_access_token(Some("Bearer eyJ..."), &VerifyOptions::new().audience("todo-api"))
//!     .await?;
//! println!("authenticated {}", claims.subject());
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Rotation
//!
//! By default fetched keys are kept until [`IssuerVerifierCache::invalidate`];
//! a token signed with a key the issuer rotated in afterwards fails with
//! [`VerificationError::InvalidSignature`]. Set
//! [`AuthenticatorConfig::key_ttl`] and/or
//! [`AuthenticatorConfig::refresh_on_unknown_key`] to refetch automatically.
//!
//! ## Feature Flags
//!
//! - `middleware` - [`BearerAuthLayer`](middleware::BearerAuthLayer) for Tower
//!   / Axum stacks (alias: `tower`)

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod authenticator;
pub mod cache;
pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod material;
pub mod peek;
pub mod policy;
pub mod source;
pub mod verifier;

#[cfg(feature = "middleware")]
#[cfg_attr(docsrs, doc(cfg(feature = "middleware")))]
pub mod middleware;

#[doc(inline)]
pub use authenticator::Authenticator;
#[doc(inline)]
pub use cache::{CacheOptions, IssuerVerifierCache};
#[doc(inline)]
pub use claims::{Audience, VerifiedClaims};
#[doc(inline)]
pub use clock::{Clock, ManualClock, SystemClock};
#[doc(inline)]
pub use config::{AuthenticatorConfig, ConfigError};
#[doc(inline)]
pub use error::{ErrorKind, Fault, Result, VerificationError};
#[doc(inline)]
pub use material::{IssuerKeyMaterial, SigningKey};
#[doc(inline)]
pub use peek::{RawToken, UnverifiedClaims, peek_issuer};
#[doc(inline)]
pub use policy::{VerifyOptions, apply_policy};
#[doc(inline)]
pub use source::{DiscoveryMode, FetchError, HttpKeySource, KeySource, StaticKeySource};
#[doc(inline)]
pub use verifier::{DEFAULT_ALGORITHMS, Verifier, VerifierSettings};

/// Re-exported so callers can name algorithms without a direct dependency
pub use jsonwebtoken::Algorithm;
