//! # Tower middleware
//!
//! [`BearerAuthLayer`] wraps an HTTP service so that every request must carry
//! a valid bearer token. On success the [`VerifiedClaims`](crate::VerifiedClaims)
//! are inserted into the request's extensions; on failure the inner service
//! is not called and the layer answers itself:
//!
//! | [`Fault`](crate::Fault) | status | `WWW-Authenticate` |
//! |---|---|---|
//! | `Unauthenticated` | 401 | `Bearer` or `Bearer error="invalid_token"` |
//! | `Forbidden` | 403 | `Bearer error="insufficient_scope"` |
//! | `Server` | 500 | none |
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use bearer_verify::{Authenticator, AuthenticatorConfig, VerifyOptions};
//! use bearer_verify::middleware::BearerAuthLayer;
//!
//! let authenticator = Authenticator::from_config(AuthenticatorConfig::from_env()?)?;
//! let service = ServiceBuilder::new()
//!     .layer(BearerAuthLayer::new(authenticator).options(VerifyOptions::new().role("admin")))
//!     .service(my_http_handler);
//! ```

mod layer;
mod service;

pub use layer::BearerAuthLayer;
pub use service::{BearerAuthService, error_response};
