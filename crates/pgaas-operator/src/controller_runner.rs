//! Controller runner - builds the PostgresqlStandalone controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use pgaas_common::crd::{PostgresqlStandalone, Release};
use pgaas_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE};
use pgaas_standalone::{error_policy, reconcile, release_to_instance, ControllerContext};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

fn managed_selector() -> String {
    format!("{LABEL_MANAGED_BY}={LABEL_MANAGED_BY_VALUE}")
}

/// Build the instance controller
///
/// Besides instances it watches the connection secrets they own and the
/// Helm releases labelled with their instance, so a provider reporting the
/// release ready triggers a reconcile without waiting for the poll.
pub fn build_controller(
    client: Client,
    ctx: Arc<ControllerContext>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let instances: Api<PostgresqlStandalone> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let releases: Api<Release> = Api::all(client);
    let managed = WatcherConfig::default()
        .labels(&managed_selector())
        .timeout(WATCH_TIMEOUT_SECS);

    tracing::info!("- PostgresqlStandalone controller");

    Box::pin(
        Controller::new(
            instances,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .owns(secrets, managed.clone())
        .watches(releases, managed, release_to_instance)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("PostgresqlStandalone")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
