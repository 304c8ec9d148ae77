//! Admission webhook for PostgresqlStandalone
//!
//! - `POST /mutate` fills defaults through a JSON patch
//! - `POST /validate` rejects major-version changes and storage shrinkage
//! - `GET /healthz` reports liveness

#![deny(missing_docs)]

pub mod admission;
pub mod rules;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

/// Error type for webhook server operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Certificate or key could not be loaded
    #[error("TLS config error: {0}")]
    Tls(#[source] std::io::Error),

    /// The server stopped with an error
    #[error("webhook server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Where and how the webhook listens
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Router with the admission and health endpoints
pub fn webhook_router() -> Router {
    Router::new()
        .route("/mutate", post(admission::mutate_handler))
        .route("/validate", post(admission::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serve the webhook over TLS until the server fails
pub async fn serve(config: WebhookConfig) -> Result<(), WebhookError> {
    let tls_config = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(WebhookError::Tls)?;

    info!(addr = %config.addr, "starting admission webhook");
    axum_server::bind_rustls(config.addr, tls_config)
        .serve(webhook_router().into_make_service())
        .await
        .map_err(WebhookError::Serve)
}
