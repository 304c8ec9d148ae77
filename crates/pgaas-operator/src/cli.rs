//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pgaas_common::telemetry::{LogFormat, TelemetryConfig};
use pgaas_common::{
    DEFAULT_OPERATOR_NAMESPACE, REQUEUE_ERROR_SECS, REQUEUE_PROGRESSING_SECS,
    REQUEUE_SUCCESS_SECS,
};
use pgaas_standalone::controller::DEFAULT_DEADLINE_SECS;
use pgaas_standalone::ReconcileSettings;
use pgaas_webhook::WebhookConfig;

/// Name reported on events and used as the server-side apply field manager
pub const CONTROLLER_NAME: &str = "pgaas-operator";

/// Standalone PostgreSQL operator
#[derive(Parser, Debug)]
#[command(name = "pgaas-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Namespace holding the operator configs
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    pub operator_namespace: String,

    /// Upper bound on one reconcile, in seconds
    #[arg(long, env = "RECONCILE_DEADLINE_SECS", default_value_t = DEFAULT_DEADLINE_SECS)]
    pub reconcile_deadline_secs: u64,

    /// Requeue interval for Ready instances, in seconds
    #[arg(long, env = "REQUEUE_READY_SECS", default_value_t = REQUEUE_SUCCESS_SECS)]
    pub requeue_ready_secs: u64,

    /// Requeue interval while waiting for a release, in seconds
    #[arg(long, env = "REQUEUE_PROGRESSING_SECS", default_value_t = REQUEUE_PROGRESSING_SECS)]
    pub requeue_progressing_secs: u64,

    /// Requeue interval after a retryable error, in seconds
    #[arg(long, env = "REQUEUE_ERROR_SECS", default_value_t = REQUEUE_ERROR_SECS)]
    pub requeue_error_secs: u64,

    /// Skip installing the CRDs on startup
    #[arg(long, env = "SKIP_CRD_INSTALL")]
    pub skip_crd_install: bool,

    /// Do not serve the admission webhook
    #[arg(long, env = "DISABLE_WEBHOOK")]
    pub disable_webhook: bool,

    /// Webhook bind address
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub webhook_addr: SocketAddr,

    /// Webhook TLS certificate (PEM)
    #[arg(
        long,
        env = "WEBHOOK_CERT_PATH",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.crt"
    )]
    pub webhook_cert_path: PathBuf,

    /// Webhook TLS private key (PEM)
    #[arg(
        long,
        env = "WEBHOOK_KEY_PATH",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.key"
    )]
    pub webhook_key_path: PathBuf,

    /// Log line format: json or pretty
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// OTLP gRPC endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Cli {
    /// Deadline and requeue intervals
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            deadline: Duration::from_secs(self.reconcile_deadline_secs),
            requeue_ready: Duration::from_secs(self.requeue_ready_secs),
            requeue_progressing: Duration::from_secs(self.requeue_progressing_secs),
            requeue_error: Duration::from_secs(self.requeue_error_secs),
        }
    }

    /// Webhook listener settings
    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            addr: self.webhook_addr,
            cert_path: self.webhook_cert_path.clone(),
            key_path: self.webhook_key_path.clone(),
        }
    }

    /// Logging and export settings
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: CONTROLLER_NAME.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            log_format: self.log_format,
        }
    }
}
