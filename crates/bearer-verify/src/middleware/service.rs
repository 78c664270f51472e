//! Tower Service for bearer authentication

use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use tower_service::Service;
use tracing::debug;

use crate::authenticator::Authenticator;
use crate::error::{Fault, VerificationError};
use crate::policy::VerifyOptions;

/// Service that authenticates each request before forwarding it
#[derive(Debug, Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    authenticator: Authenticator,
    options: VerifyOptions,
}

impl<S> BearerAuthService<S> {
    /// Wrap `inner`
    pub fn new(inner: S, authenticator: Authenticator, options: VerifyOptions) -> Self {
        Self {
            inner,
            authenticator,
            options,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

/// HTTP answer for a rejected request
///
/// Bodies are empty; details stay in the server logs.
pub fn error_response<B: Default>(error: &VerificationError) -> http::Response<B> {
    let (status, challenge) = match error.fault() {
        Fault::Unauthenticated if *error == VerificationError::MissingCredential => {
            (StatusCode::UNAUTHORIZED, Some("Bearer"))
        }
        Fault::Unauthenticated => (
            StatusCode::UNAUTHORIZED,
            Some(r#"Bearer error="invalid_token""#),
        ),
        Fault::Forbidden => (
            StatusCode::FORBIDDEN,
            Some(r#"Bearer error="insufficient_scope""#),
        ),
        Fault::Server => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };

    let mut response = http::Response::new(B::default());
    *response.status_mut() = status;
    if let Some(challenge) = challenge {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    }
    response
}

impl<S, B, ResBody> Service<http::Request<B>> for BearerAuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let header = match req.headers().get(AUTHORIZATION) {
            None => Ok(None),
            Some(value) => value.to_str().map(|v| Some(v.to_owned())).map_err(|_| {
                VerificationError::MalformedToken("authorization header is not visible ASCII".into())
            }),
        };

        let authenticator = self.authenticator.clone();
        let options = self.options.clone();
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        Box::pin(async move {
            let outcome = match header {
                Ok(header) => {
                    authenticator
                        .verify_access_token(header.as_deref(), &options)
                        .await
                }
                Err(e) => {
                    debug!(kind = %e.kind(), error = %e, "Rejected bearer credential");
                    Err(e)
                }
            };

            match outcome {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(e) => Ok(error_response(&e)),
            }
        })
    }
}
