//! The `verify_access_token` pipeline
//!
//! `peek → cache → verify → policy`. Every step can reject; nothing is retried
//! within a request except a single key refresh when enabled and the token's
//! `kid` is unknown.

use std::sync::Arc;

use tracing::{Instrument, debug, error, warn};

use crate::cache::{CacheOptions, IssuerVerifierCache};
use crate::claims::VerifiedClaims;
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthenticatorConfig, ConfigError};
use crate::error::{Fault, Result, VerificationError};
use crate::peek::{RawToken, UnverifiedClaims, peek_issuer};
use crate::policy::{VerifyOptions, apply_policy};
use crate::source::{HttpKeySource, KeySource};
use crate::verifier::VerifierSettings;

/// Verifies `Authorization` header values against any trusted issuer
///
/// Cheap to clone; clones share the verifier cache.
#[derive(Debug, Clone)]
pub struct Authenticator {
    config: Arc<AuthenticatorConfig>,
    cache: IssuerVerifierCache,
}

impl Authenticator {
    /// Build an authenticator that discovers keys over HTTP
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation or the HTTP
    /// client cannot be created.
    pub fn from_config(config: AuthenticatorConfig) -> Result<Self, ConfigError> {
        // Per HTTP request; the cache bounds the whole discovery
        let source = HttpKeySource::new(config.discovery, config.fetch_timeout)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?
            .allow_insecure_http(config.allow_insecure_http);

        Self::with_source(config, Arc::new(source), Arc::new(SystemClock))
    }

    /// Build an authenticator over an arbitrary key source and clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_source(
        config: AuthenticatorConfig,
        source: Arc<dyn KeySource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let settings = VerifierSettings::default()
            .with_clock(clock)
            .with_leeway(config.leeway)
            .with_algorithms(config.allowed_algorithms.clone());
        let cache = IssuerVerifierCache::new(source, settings, CacheOptions::from(&config));

        Ok(Self {
            config: Arc::new(config),
            cache,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    /// The shared verifier cache (for invalidation and inspection)
    pub fn cache(&self) -> &IssuerVerifierCache {
        &self.cache
    }

    /// Authenticate one request
    ///
    /// `header_value` is the raw `Authorization` header, if the request had
    /// one. When `options` names no audience, the configured default audience
    /// (if any) is required instead.
    ///
    /// # Errors
    ///
    /// Any [`VerificationError`]; use [`VerificationError::fault`] to choose
    /// the transport answer.
    pub async fn verify_access_token(
        &self,
        header_value: Option<&str>,
        options: &VerifyOptions,
    ) -> Result<VerifiedClaims> {
        let (token, unverified) =
            match peek_issuer(header_value, self.config.require_bearer_scheme) {
                Ok(peeked) => peeked,
                Err(e) => {
                    debug!(kind = %e.kind(), error = %e, "Rejected bearer credential");
                    return Err(e);
                }
            };

        let span = tracing::debug_span!(
            "verify_access_token",
            token = %token.fingerprint(),
            issuer = %unverified.issuer(),
        );

        async move {
            let outcome = self.verify_peeked(&token, &unverified, options).await;
            match &outcome {
                Ok(claims) => debug!(subject = claims.subject(), "Bearer token accepted"),
                Err(e) => report(e),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn verify_peeked(
        &self,
        token: &RawToken,
        unverified: &UnverifiedClaims,
        options: &VerifyOptions,
    ) -> Result<VerifiedClaims> {
        let issuer = unverified.issuer();
        let mut verifier = self.cache.get_or_build(issuer).await?;

        if self.config.refresh_on_unknown_key && !verifier.has_key(unverified.key_id()) {
            debug!(key_id = ?unverified.key_id(), "Unknown signing key, refreshing issuer keys");
            match self.cache.refresh(issuer).await {
                Ok(fresh) => verifier = fresh,
                Err(e) => warn!(error = %e, "Key refresh failed, verifying with current keys"),
            }
        }

        let claims = verifier.verify(token)?;

        let audience = options
            .required_audience
            .as_deref()
            .or(self.config.default_audience.as_deref());
        apply_policy(claims, audience, options.required_role.as_deref())
    }
}

fn report(error: &VerificationError) {
    match error.fault() {
        Fault::Server => error!(
            kind = %error.kind(),
            error = %error,
            "Bearer token verification failed on the server side"
        ),
        Fault::Unauthenticated | Fault::Forbidden => {
            debug!(kind = %error.kind(), error = %error, "Rejected bearer token");
        }
    }
}
