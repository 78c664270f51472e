//! Issuer discovery and key fetch
//!
//! A [`KeySource`] turns an issuer identifier into [`IssuerKeyMaterial`]. The
//! verifier cache calls it at most once per issuer at a time and bounds every
//! call with a timeout, so implementations only need to do the I/O.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpKeySource`] fetches keys over HTTPS, either through OpenID Connect
//!   discovery or through a Keycloak realm's certificate endpoint
//! - [`StaticKeySource`] serves fixed key sets (pinned deployments, tests)

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::VerificationError;
use crate::material::IssuerKeyMaterial;

/// Largest discovery document or JWKS we are willing to read
const MAX_RESPONSE_SIZE: usize = 256 * 1024;

/// Path appended to a Keycloak realm issuer to reach its signing certificates
const KEYCLOAK_CERTS_PATH: &str = "protocol/openid-connect/certs";

/// Path appended to an issuer for OpenID Connect discovery
const OIDC_DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Failure of a discovery / key fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network, TLS, timeout or non-success status
    #[error("{0}")]
    Unreachable(String),

    /// The issuer answered with something we cannot use
    #[error("{0}")]
    Malformed(String),

    /// The issuer identifier itself is not acceptable (scheme, shape)
    #[error("{0}")]
    Untrusted(String),
}

impl From<FetchError> for VerificationError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Unreachable(detail) => Self::IssuerUnreachable(detail),
            FetchError::Malformed(detail) => Self::DiscoveryMalformed(detail),
            FetchError::Untrusted(detail) => Self::IssuerUntrusted(detail),
        }
    }
}

/// Capability to obtain an issuer's current verification keys
#[async_trait]
pub trait KeySource: Send + Sync + fmt::Debug {
    /// Resolve and fetch the key material for `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] describing why no key material is available.
    async fn fetch(&self, issuer: &str) -> Result<IssuerKeyMaterial, FetchError>;
}

/// How an issuer identifier is turned into a key set location
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// `{issuer}/.well-known/openid-configuration`, then its `jwks_uri`
    #[default]
    OpenIdConfiguration,
    /// `{issuer}/protocol/openid-connect/certs`; the issuer must end in
    /// `/realms/{realm}`
    KeycloakRealm,
}

impl std::str::FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oidc" | "openid" | "openid_configuration" => Ok(Self::OpenIdConfiguration),
            "keycloak" | "keycloak_realm" => Ok(Self::KeycloakRealm),
            other => Err(format!("unknown discovery mode {other:?}")),
        }
    }
}

/// Minimal OpenID Connect discovery document
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// Fetches key material over HTTP(S)
///
/// Redirects are not followed and response bodies are capped. Plain `http`
/// is only accepted for loopback hosts unless explicitly allowed.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    mode: DiscoveryMode,
    allow_insecure_http: bool,
}

impl HttpKeySource {
    /// Create a source using `mode`, with `timeout` applied per HTTP request
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unreachable`] if the HTTP client cannot be built
    /// (e.g. TLS backend initialisation failure).
    pub fn new(mode: DiscoveryMode, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bearer-verify/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Unreachable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            mode,
            allow_insecure_http: false,
        })
    }

    /// Accept `http://` issuers on any host
    #[must_use]
    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.allow_insecure_http = allow;
        self
    }

    /// Discovery mode in use
    pub fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    fn checked_url(&self, raw: &str) -> Result<Url, FetchError> {
        let url = Url::parse(raw)
            .map_err(|e| FetchError::Untrusted(format!("{raw:?} is not a URL: {e}")))?;

        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_insecure_http || is_loopback(&url) => Ok(url),
            "http" => Err(FetchError::Untrusted(format!(
                "{raw} must use https (http only allowed for localhost)"
            ))),
            other => Err(FetchError::Untrusted(format!(
                "{raw} uses unsupported scheme {other:?}"
            ))),
        }
    }

    /// Location of the key set for `issuer`
    async fn jwks_url(&self, issuer: &Url) -> Result<Url, FetchError> {
        match self.mode {
            DiscoveryMode::KeycloakRealm => {
                if !is_keycloak_realm(issuer) {
                    return Err(FetchError::Untrusted(format!(
                        "{issuer} is not a Keycloak realm issuer (expected .../realms/<realm>)"
                    )));
                }
                join(issuer, KEYCLOAK_CERTS_PATH)
            }
            DiscoveryMode::OpenIdConfiguration => {
                let discovery_url = join(issuer, OIDC_DISCOVERY_PATH)?;
                debug!(discovery_url = %discovery_url, "Fetching OpenID Connect discovery document");

                let body = self.get(&discovery_url).await?;
                let document: DiscoveryDocument = serde_json::from_slice(&body).map_err(|e| {
                    FetchError::Malformed(format!("invalid discovery document: {e}"))
                })?;

                if trim_slash(&document.issuer) != trim_slash(issuer.as_str()) {
                    return Err(FetchError::Malformed(format!(
                        "discovery document issuer {:?} does not match {issuer}",
                        document.issuer
                    )));
                }

                self.checked_url(&document.jwks_uri)
            }
        }
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            let reason = if e.is_timeout() { "timed out" } else { "failed" };
            FetchError::Unreachable(format!("GET {url} {reason}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("GET {url} returned {status}")));
        }

        if let Some(length) = response.content_length()
            && length > MAX_RESPONSE_SIZE as u64
        {
            return Err(FetchError::Malformed(format!(
                "GET {url} response of {length} bytes exceeds limit"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Unreachable(format!("reading {url} failed: {e}")))?;

        if body.len() > MAX_RESPONSE_SIZE {
            return Err(FetchError::Malformed(format!(
                "GET {url} response exceeds {MAX_RESPONSE_SIZE} bytes"
            )));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self, issuer: &str) -> Result<IssuerKeyMaterial, FetchError> {
        let issuer_url = self.checked_url(issuer)?;
        let jwks_url = self.jwks_url(&issuer_url).await?;

        let body = self.get(&jwks_url).await?;
        let jwks: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Malformed(format!("invalid JWKS from {jwks_url}: {e}")))?;

        let material = IssuerKeyMaterial::from_jwks(issuer, &jwks)?;
        info!(
            issuer = issuer,
            jwks_uri = %jwks_url,
            key_count = material.len(),
            "Fetched issuer signing keys"
        );
        Ok(material)
    }
}

fn trim_slash(s: &str) -> &str {
    s.trim_end_matches('/')
}

/// Append `suffix` to the issuer path (issuer paths are significant, so this
/// is not RFC 3986 reference resolution)
fn join(base: &Url, suffix: &str) -> Result<Url, FetchError> {
    let joined = format!("{}/{suffix}", trim_slash(base.as_str()));
    Url::parse(&joined).map_err(|e| FetchError::Untrusted(format!("cannot build {joined}: {e}")))
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn is_keycloak_realm(issuer: &Url) -> bool {
    let segments: Vec<&str> = issuer
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    matches!(segments.as_slice(), [.., "realms", realm] if !realm.is_empty())
}

/// Serves fixed key sets
///
/// ```rust
/// use bearer_verify::StaticKeySource;
///
/// let source = StaticKeySource::new().with_jwks(
///     "https://idp.example/realms/main",
///     serde_json::json!({"keys": []}),
/// );
/// assert!(source.contains("https://idp.example/realms/main"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticKeySource {
    sets: HashMap<String, serde_json::Value>,
}

impl StaticKeySource {
    /// Empty source; every issuer is unknown
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a JWKS document for `issuer`
    #[must_use]
    pub fn with_jwks(mut self, issuer: impl Into<String>, jwks: serde_json::Value) -> Self {
        self.sets.insert(issuer.into(), jwks);
        self
    }

    /// Whether a key set is registered for `issuer`
    pub fn contains(&self, issuer: &str) -> bool {
        self.sets.contains_key(issuer)
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self, issuer: &str) -> Result<IssuerKeyMaterial, FetchError> {
        let jwks = self.sets.get(issuer).ok_or_else(|| {
            warn!(issuer = issuer, "No static key set registered");
            FetchError::Untrusted(format!("no key set registered for {issuer}"))
        })?;
        IssuerKeyMaterial::from_jwks(issuer, jwks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(mode: DiscoveryMode) -> HttpKeySource {
        HttpKeySource::new(mode, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn discovery_mode_parses_env_spellings() {
        assert_eq!("oidc".parse(), Ok(DiscoveryMode::OpenIdConfiguration));
        assert_eq!("Keycloak".parse(), Ok(DiscoveryMode::KeycloakRealm));
        assert!("ldap".parse::<DiscoveryMode>().is_err());
    }

    #[test]
    fn https_required_except_loopback() {
        let source = source(DiscoveryMode::OpenIdConfiguration);

        assert!(source.checked_url("https://idp.example").is_ok());
        assert!(source.checked_url("http://localhost:8080/realms/x").is_ok());
        assert!(source.checked_url("http://127.0.0.1:8080").is_ok());
        assert!(matches!(
            source.checked_url("http://idp.example"),
            Err(FetchError::Untrusted(_))
        ));
        assert!(matches!(
            source.checked_url("ftp://idp.example"),
            Err(FetchError::Untrusted(_))
        ));
        assert!(matches!(
            source.checked_url("not a url"),
            Err(FetchError::Untrusted(_))
        ));
    }

    #[test]
    fn insecure_http_can_be_allowed() {
        let source = source(DiscoveryMode::OpenIdConfiguration).allow_insecure_http(true);
        assert!(source.checked_url("http://idp.internal").is_ok());
    }

    #[test]
    fn keycloak_realm_shape() {
        let ok = Url::parse("https://kc.example/auth/realms/main/").unwrap();
        let bad = Url::parse("https://kc.example/auth/main").unwrap();
        let empty = Url::parse("https://kc.example/realms/").unwrap();

        assert!(is_keycloak_realm(&ok));
        assert!(!is_keycloak_realm(&bad));
        assert!(!is_keycloak_realm(&empty));
    }

    #[test]
    fn join_keeps_issuer_path() {
        let issuer = Url::parse("https://kc.example/realms/main/").unwrap();
        assert_eq!(
            join(&issuer, KEYCLOAK_CERTS_PATH).unwrap().as_str(),
            "https://kc.example/realms/main/protocol/openid-connect/certs"
        );
    }

    #[tokio::test]
    async fn keycloak_mode_rejects_non_realm_issuer_without_io() {
        let source = source(DiscoveryMode::KeycloakRealm);
        let err = source.fetch("https://kc.example/not-a-realm").await.unwrap_err();
        assert!(matches!(err, FetchError::Untrusted(_)));
    }

    #[tokio::test]
    async fn static_source_unknown_issuer_is_untrusted() {
        let err = StaticKeySource::new().fetch("https://nobody").await.unwrap_err();
        assert!(matches!(err, FetchError::Untrusted(_)));
    }
}
