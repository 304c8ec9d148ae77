//! pgaas-operator - standalone PostgreSQL instances on Kubernetes

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use pgaas_common::events::KubeEventPublisher;
use pgaas_common::store::Store;
use pgaas_common::telemetry::init_telemetry;
use pgaas_operator::cli::{Cli, CONTROLLER_NAME};
use pgaas_operator::{controller_runner, crds};
use pgaas_standalone::ControllerContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook's TLS stack needs a process-wide crypto provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crds::crd_yaml()?);
        return Ok(());
    }

    init_telemetry(cli.telemetry_config())?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {e}"))?;

    if cli.skip_crd_install {
        tracing::info!("skipping CRD installation");
    } else {
        crds::ensure_crds_installed(&client).await?;
    }

    let ctx = Arc::new(
        ControllerContext::builder(Store::kube(client.clone()))
            .events(Arc::new(KubeEventPublisher::new(
                client.clone(),
                CONTROLLER_NAME,
            )))
            .operator_namespace(cli.operator_namespace.clone())
            .settings(cli.reconcile_settings())
            .build(),
    );
    tracing::info!(
        operator_namespace = %cli.operator_namespace,
        "starting controllers"
    );
    let controller = controller_runner::build_controller(client, ctx);

    if cli.disable_webhook {
        controller.await;
        return Ok(());
    }

    tokio::select! {
        () = controller => tracing::info!("controller stopped"),
        result = pgaas_webhook::serve(cli.webhook_config()) => result?,
    }
    tracing::info!("shutting down");
    Ok(())
}
