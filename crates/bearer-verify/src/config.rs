//! Authenticator configuration
//!
//! ```rust
//! use std::time::Duration;
//! use bearer_verify::AuthenticatorConfig;
//!
//! let config = AuthenticatorConfig::default()
//!     .with_trusted_issuer("https://sso.example.com/realms/main")
//!     .with_default_audience("todo-api")
//!     .with_fetch_timeout(Duration::from_secs(5));
//! assert!(config.validate().is_ok());
//! ```

use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::DiscoveryMode;
use crate::verifier::DEFAULT_ALGORITHMS;

/// Invalid configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Raw value found
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// A setting is out of its valid range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for [`Authenticator`](crate::Authenticator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// Exact-match issuer allow-list; empty accepts any issuer
    pub trusted_issuers: Vec<String>,
    /// Audience required when a call does not name one
    pub default_audience: Option<String>,
    /// Upper bound on one discovery + key fetch
    pub fetch_timeout: Duration,
    /// Cache capacity in issuers
    pub max_issuers: usize,
    /// Clock skew tolerated on `exp` / `nbf`
    pub leeway: Duration,
    /// Reject header values without the `Bearer ` prefix
    pub require_bearer_scheme: bool,
    /// Age after which an issuer's keys are fetched again
    pub key_ttl: Option<Duration>,
    /// Re-fetch keys once when a token's `kid` is unknown
    pub refresh_on_unknown_key: bool,
    /// Minimum spacing between refreshes of one issuer
    pub min_refresh_interval: Duration,
    /// Accepted signature algorithms
    pub allowed_algorithms: Vec<Algorithm>,
    /// How issuers are resolved to key sets
    pub discovery: DiscoveryMode,
    /// Permit `http://` issuers on non-loopback hosts
    pub allow_insecure_http: bool,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            trusted_issuers: Vec::new(),
            default_audience: None,
            fetch_timeout: Duration::from_secs(10),
            max_issuers: 64,
            leeway: Duration::ZERO,
            require_bearer_scheme: false,
            key_ttl: None,
            refresh_on_unknown_key: false,
            min_refresh_interval: Duration::from_secs(30),
            allowed_algorithms: DEFAULT_ALGORITHMS.to_vec(),
            discovery: DiscoveryMode::default(),
            allow_insecure_http: false,
        }
    }
}

impl AuthenticatorConfig {
    /// Load from `AUTH_*` environment variables, falling back to defaults
    ///
    /// | variable | setting |
    /// |---|---|
    /// | `AUTH_TRUSTED_ISSUERS` (comma separated) or `OIDC_ISSUER` | `trusted_issuers` |
    /// | `AUTH_AUDIENCE` | `default_audience` |
    /// | `AUTH_FETCH_TIMEOUT_SECS` | `fetch_timeout` |
    /// | `AUTH_MAX_ISSUERS` | `max_issuers` |
    /// | `AUTH_LEEWAY_SECS` | `leeway` |
    /// | `AUTH_REQUIRE_BEARER_SCHEME` | `require_bearer_scheme` |
    /// | `AUTH_KEY_TTL_SECS` | `key_ttl` |
    /// | `AUTH_REFRESH_ON_UNKNOWN_KEY` | `refresh_on_unknown_key` |
    /// | `AUTH_MIN_REFRESH_INTERVAL_SECS` | `min_refresh_interval` |
    /// | `AUTH_DISCOVERY_MODE` (`oidc` / `keycloak`) | `discovery` |
    /// | `AUTH_ALLOW_INSECURE_HTTP` | `allow_insecure_http` |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparseable value or
    /// the resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(list) = var("AUTH_TRUSTED_ISSUERS") {
            config.trusted_issuers = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        } else if let Some(issuer) = var("OIDC_ISSUER") {
            config.trusted_issuers = vec![issuer.trim().to_owned()];
        }

        config.default_audience = var("AUTH_AUDIENCE").map(|s| s.trim().to_owned());

        if let Some(v) = var("AUTH_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = seconds("AUTH_FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("AUTH_MAX_ISSUERS") {
            config.max_issuers = parse("AUTH_MAX_ISSUERS", &v)?;
        }
        if let Some(v) = var("AUTH_LEEWAY_SECS") {
            config.leeway = seconds("AUTH_LEEWAY_SECS", &v)?;
        }
        if let Some(v) = var("AUTH_REQUIRE_BEARER_SCHEME") {
            config.require_bearer_scheme = flag("AUTH_REQUIRE_BEARER_SCHEME", &v)?;
        }
        if let Some(v) = var("AUTH_KEY_TTL_SECS") {
            config.key_ttl = Some(seconds("AUTH_KEY_TTL_SECS", &v)?);
        }
        if let Some(v) = var("AUTH_REFRESH_ON_UNKNOWN_KEY") {
            config.refresh_on_unknown_key = flag("AUTH_REFRESH_ON_UNKNOWN_KEY", &v)?;
        }
        if let Some(v) = var("AUTH_MIN_REFRESH_INTERVAL_SECS") {
            config.min_refresh_interval = seconds("AUTH_MIN_REFRESH_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("AUTH_DISCOVERY_MODE") {
            config.discovery = parse("AUTH_DISCOVERY_MODE", &v)?;
        }
        if let Some(v) = var("AUTH_ALLOW_INSECURE_HTTP") {
            config.allow_insecure_http = flag("AUTH_ALLOW_INSECURE_HTTP", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero `max_issuers`, a zero
    /// `fetch_timeout`, or an empty algorithm list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_issuers == 0 {
            return Err(ConfigError::Invalid("max_issuers must be at least 1".into()));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("fetch_timeout must be positive".into()));
        }
        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::Invalid(
                "allowed_algorithms must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Whether `issuer` passes the allow-list
    pub fn is_trusted(&self, issuer: &str) -> bool {
        crate::cache::is_trusted(&self.trusted_issuers, issuer)
    }

    /// Add an issuer to the allow-list
    #[must_use]
    pub fn with_trusted_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.trusted_issuers.push(issuer.into());
        self
    }

    /// Audience required when a call names none
    #[must_use]
    pub fn with_default_audience(mut self, audience: impl Into<String>) -> Self {
        self.default_audience = Some(audience.into());
        self
    }

    /// Set the discovery timeout
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the cache capacity
    #[must_use]
    pub fn with_max_issuers(mut self, max_issuers: usize) -> Self {
        self.max_issuers = max_issuers;
        self
    }

    /// Set the clock skew tolerance
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Require the `Bearer ` prefix
    #[must_use]
    pub fn with_require_bearer_scheme(mut self, require: bool) -> Self {
        self.require_bearer_scheme = require;
        self
    }

    /// Rebuild verifiers older than `ttl`
    #[must_use]
    pub fn with_key_ttl(mut self, ttl: Duration) -> Self {
        self.key_ttl = Some(ttl);
        self
    }

    /// Refresh keys once on an unknown `kid`
    #[must_use]
    pub fn with_refresh_on_unknown_key(mut self, refresh: bool) -> Self {
        self.refresh_on_unknown_key = refresh;
        self
    }

    /// Minimum spacing between refreshes of one issuer
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Replace the accepted algorithms
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Set the discovery mode
    #[must_use]
    pub fn with_discovery(mut self, discovery: DiscoveryMode) -> Self {
        self.discovery = discovery;
        self
    }

    /// Permit plain `http://` issuers
    #[must_use]
    pub fn with_allow_insecure_http(mut self, allow: bool) -> Self {
        self.allow_insecure_http = allow;
        self
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn seconds(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(var, value).map(Duration::from_secs)
}

fn flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}
