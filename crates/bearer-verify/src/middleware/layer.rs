//! Tower Layer for bearer authentication

use tower::Layer;

use crate::authenticator::Authenticator;
use crate::policy::VerifyOptions;

use super::service::BearerAuthService;

/// Layer that puts [`BearerAuthService`] in front of a service
#[derive(Debug, Clone)]
pub struct BearerAuthLayer {
    authenticator: Authenticator,
    options: VerifyOptions,
}

impl BearerAuthLayer {
    /// Require a valid token, with no audience or role beyond the
    /// authenticator's defaults
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            authenticator,
            options: VerifyOptions::default(),
        }
    }

    /// Replace the per-request requirements
    #[must_use]
    pub fn options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    /// Require `audience` in `aud`
    #[must_use]
    pub fn require_audience(mut self, audience: impl Into<String>) -> Self {
        self.options = self.options.audience(audience);
        self
    }

    /// Require `role`
    #[must_use]
    pub fn require_role(mut self, role: impl Into<String>) -> Self {
        self.options = self.options.role(role);
        self
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService::new(inner, self.authenticator.clone(), self.options.clone())
    }
}
