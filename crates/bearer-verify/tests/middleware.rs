//! `BearerAuthLayer` in a Tower stack

mod common;

use std::convert::Infallible;
use std::io;
use std::sync::{Arc, Mutex};

use bearer_verify::middleware::BearerAuthLayer;
use bearer_verify::{AuthenticatorConfig, FetchError, VerifiedClaims};
use common::*;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderValue, Request, Response, StatusCode};
use tower::{ServiceBuilder, ServiceExt};

/// Echoes the authenticated subject
async fn whoami(req: Request<()>) -> Result<Response<String>, Infallible> {
    let subject = req
        .extensions()
        .get::<VerifiedClaims>()
        .map(|claims| claims.subject().to_owned())
        .unwrap_or_default();
    Ok(Response::new(subject))
}

fn layer(source: Arc<CountingSource>) -> BearerAuthLayer {
    BearerAuthLayer::new(authenticator(AuthenticatorConfig::default(), source))
}

fn source() -> Arc<CountingSource> {
    Arc::new(CountingSource::new().with_keys(ISSUER_A, TestKey::A.jwks("k1")))
}

fn request(authorization: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().uri("/whoami");
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    builder.body(()).unwrap()
}

fn valid_header() -> String {
    bearer(&TestKey::A.sign(Some("k1"), &claims(ISSUER_A, "user-7", NOW + 600)))
}

#[tokio::test]
async fn valid_token_reaches_inner_service_with_claims() {
    let service = ServiceBuilder::new()
        .layer(layer(source()))
        .service_fn(whoami);

    let response = service.oneshot(request(Some(&valid_header()))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "user-7");
}

#[tokio::test]
async fn missing_header_is_401_with_challenge() {
    let service = ServiceBuilder::new()
        .layer(layer(source()))
        .service_fn(whoami);

    let response = service.oneshot(request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
    assert!(response.body().is_empty());
}

#[tokio::test]
async fn bad_token_is_401_invalid_token() {
    let service = ServiceBuilder::new()
        .layer(layer(source()))
        .service_fn(whoami);

    let response = service
        .oneshot(request(Some("Bearer definitely.not.valid")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[WWW_AUTHENTICATE],
        r#"Bearer error="invalid_token""#
    );
}

#[tokio::test]
async fn non_ascii_header_is_401() {
    let service = ServiceBuilder::new()
        .layer(layer(source()))
        .service_fn(whoami);

    let mut req = request(None);
    req.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_bytes(b"Bearer \xfftoken").unwrap(),
    );
    let response = service.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Collects formatted log output for assertions
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn non_ascii_header_rejection_is_logged() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let source = source();
    let service = ServiceBuilder::new()
        .layer(layer(source.clone()))
        .service_fn(whoami);

    let mut req = request(None);
    req.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_bytes(b"Bearer \xfftoken").unwrap(),
    );
    let response = service.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(source.total_calls(), 0);
    let output = logs.contents();
    assert!(output.contains("Rejected bearer credential"), "{output}");
    assert!(output.contains("malformed_token"), "{output}");
}

#[tokio::test]
async fn missing_role_is_403() {
    let service = ServiceBuilder::new()
        .layer(layer(source()).require_role("admin"))
        .service_fn(whoami);

    let response = service.oneshot(request(Some(&valid_header()))).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers()[WWW_AUTHENTICATE],
        r#"Bearer error="insufficient_scope""#
    );
}

#[tokio::test]
async fn required_audience_is_enforced() {
    let service = ServiceBuilder::new()
        .layer(layer(source()).require_audience("todo-api"))
        .service_fn(whoami);
    let response = service.oneshot(request(Some(&valid_header()))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let service = ServiceBuilder::new()
        .layer(layer(source()).require_audience("billing"))
        .service_fn(whoami);
    let response = service.oneshot(request(Some(&valid_header()))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn discovery_outage_is_500() {
    let source = source();
    source.fail(ISSUER_A, FetchError::Unreachable("timeout".into()));
    let service = ServiceBuilder::new()
        .layer(layer(source))
        .service_fn(whoami);

    let response = service.oneshot(request(Some(&valid_header()))).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
}
