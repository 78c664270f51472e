//! Common test utilities for integration tests
//!
//! Fixed RSA keys, token minting, and an instrumented key source that counts
//! fetches and can be slowed, gated or made to fail per issuer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bearer_verify::{
    Authenticator, AuthenticatorConfig, FetchError, IssuerKeyMaterial, KeySource, ManualClock,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

pub const ISSUER_A: &str = "https://sso.example.com/realms/alpha";
pub const ISSUER_B: &str = "https://sso.example.com/realms/beta";

/// Frozen "now" used by pipeline tests
pub const NOW: i64 = 1_800_000_000;

/// One of the two fixture signing keys
#[derive(Debug, Clone, Copy)]
pub enum TestKey {
    A,
    B,
}

impl TestKey {
    fn pem(self) -> &'static str {
        match self {
            Self::A => include_str!("../fixtures/signing_key_a.pem"),
            Self::B => include_str!("../fixtures/signing_key_b.pem"),
        }
    }

    fn modulus(self) -> &'static str {
        match self {
            Self::A => {
                "3nX-vRk5kB4m5RTBl5wdcACuteOtjp_XJiAkbwKcMCWFPXxEjT1z4Bszwhfdf_TGaDLQ8-PKJ66_rnz6zecxmFcSqDzXfP2rR43JNbGxMa2mv8XGKYbmQ-sOXhisS4q654HTFju_f9EM0dVF7GPktGPNzjAT7SKGpMPwrjXw73XFh6PgvzJJA37wsiDglkVt3VNsAm6oemYDoNFNv9jnmjoL0saAZB8jJTWqJf1ajO1W5qh3llI82VR7DgY73cD_TBDlpl4_RmJ-bwFDfYhHg8Nor3uSGvyKBt80mHYttdiWSFnq24lmQ-Y0qTuCY7ut5yyYTClKP2-YLaSS4RnCDQ"
            }
            Self::B => {
                "74LmwSzdaHSB8x_VB6szXb0wqThzK3JObl5C2sJsU-6mhYAEH-cq2Vz0G39P450ubXk1SmvN4_jEjkB7vl-aCWNc7wFMos2qWqNMuAsAEtPdp4dbyzH2ipSE8ChwCGExx7CmmT23j2tEiKG3j07F-xxyyuTNabJt7MHS38l5nCOoyU2HTrSMCgC5Ffl2n5S2pQ-Nd--YBkh59A8pfakFv9wqClANdU3eXqaWrVyudvofN2T-QVmDrYyCw1YWALIN4KhnrkDL-9Tc2GOLQbDxkgeHgxgD2Nru6HKZgbPpukvEb2u6BZkcEyK48rBuKeMTOowOZQDUvPltBCrqLDBSzw"
            }
        }
    }

    /// Public half as a JWK
    pub fn jwk(self, kid: &str) -> Value {
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": self.modulus(),
            "e": "AQAB"
        })
    }

    /// A JWKS publishing only this key
    pub fn jwks(self, kid: &str) -> Value {
        json!({ "keys": [self.jwk(kid)] })
    }

    /// Sign `claims` with RS256
    pub fn sign(self, kid: Option<&str>, claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(self.pem().as_bytes()).expect("fixture key");
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_owned);
        encode(&header, claims, &key).expect("sign test token")
    }
}

/// Claims accepted by the default policy
pub fn claims(issuer: &str, subject: &str, exp: i64) -> Value {
    json!({
        "iss": issuer,
        "sub": subject,
        "exp": exp,
        "iat": exp - 300,
        "aud": ["account", "todo-api"],
        "realm_access": {"roles": ["reader"]},
        "scope": "openid profile"
    })
}

/// `Authorization` header value for `token`
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Key source backed by in-memory JWKS documents that records every fetch
#[derive(Debug, Default)]
pub struct CountingSource {
    sets: Mutex<HashMap<String, Value>>,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, FetchError>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    delay: Duration,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(self, issuer: &str, jwks: Value) -> Self {
        self.set_keys(issuer, jwks);
        self
    }

    /// Sleep this long inside every fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace an issuer's published keys (rotation)
    pub fn set_keys(&self, issuer: &str, jwks: Value) {
        self.sets.lock().insert(issuer.to_string(), jwks);
    }

    /// Make fetches for `issuer` fail until cleared
    pub fn fail(&self, issuer: &str, error: FetchError) {
        self.failures.lock().insert(issuer.to_string(), error);
    }

    pub fn recover(&self, issuer: &str) {
        self.failures.lock().remove(issuer);
    }

    /// Block fetches for `issuer` until permits are added to the returned gate
    pub fn gate(&self, issuer: &str) -> Arc<Semaphore> {
        Arc::clone(
            self.gates
                .lock()
                .entry(issuer.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(0))),
        )
    }

    pub fn calls(&self, issuer: &str) -> usize {
        self.calls.lock().get(issuer).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl KeySource for CountingSource {
    async fn fetch(&self, issuer: &str) -> Result<IssuerKeyMaterial, FetchError> {
        *self.calls.lock().entry(issuer.to_string()).or_default() += 1;

        let gate = self.gates.lock().get(issuer).cloned();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(error) = self.failures.lock().get(issuer).cloned() {
            return Err(error);
        }
        let jwks = self
            .sets
            .lock()
            .get(issuer)
            .cloned()
            .ok_or_else(|| FetchError::Untrusted(format!("unknown issuer {issuer}")))?;
        IssuerKeyMaterial::from_jwks(issuer, &jwks)
    }
}

/// Wait until `source` has started `n` fetches for `issuer`
pub async fn wait_for_calls(source: &CountingSource, issuer: &str, n: usize) {
    for _ in 0..1000 {
        if source.calls(issuer) >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("fetch for {issuer} never started");
}

/// Authenticator over `source` with the clock frozen at [`NOW`]
pub fn authenticator(config: AuthenticatorConfig, source: Arc<CountingSource>) -> Authenticator {
    Authenticator::with_source(config, source, Arc::new(ManualClock::at_unix(NOW)))
        .expect("valid test config")
}
