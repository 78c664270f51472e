//! Demo service protected by bearer token verification
//!
//! ```text
//! AUTH_TRUSTED_ISSUERS=https://sso.example.com/realms/main \
//! AUTH_DISCOVERY_MODE=keycloak \
//! RUST_LOG=bearer_verify=debug,info \
//! cargo run -p bearer-verify-demo
//!
//! curl -H "Authorization: Bearer $TOKEN" localhost:3000/whoami
//! ```

use std::net::SocketAddr;

use axum::routing::get;
use axum::{Extension, Json, Router};
use bearer_verify::middleware::BearerAuthLayer;
use bearer_verify::{Authenticator, AuthenticatorConfig, VerifiedClaims};
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn whoami(Extension(claims): Extension<VerifiedClaims>) -> Json<VerifiedClaims> {
    Json(claims)
}

async fn admin(Extension(claims): Extension<VerifiedClaims>) -> String {
    format!("hello admin {}", claims.subject())
}

fn app(authenticator: Authenticator) -> Router {
    let user = Router::new()
        .route("/whoami", get(whoami))
        .route_layer(BearerAuthLayer::new(authenticator.clone()));

    let admin = Router::new()
        .route("/admin", get(admin))
        .route_layer(BearerAuthLayer::new(authenticator).require_role("admin"));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(user)
        .merge(admin)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AuthenticatorConfig::from_env()?;
    if config.trusted_issuers.is_empty() {
        tracing::warn!("AUTH_TRUSTED_ISSUERS is empty; tokens from any issuer will be discovered");
    }
    let authenticator = Authenticator::from_config(config)?;

    let port = match std::env::var("PORT") {
        Ok(port) => port.parse::<u16>()?,
        Err(_) => 3000,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app(authenticator)).await?;
    Ok(())
}
