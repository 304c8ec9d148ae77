//! Create, update and delete pipelines for an instance

use pgaas_pipeline::{Branch, Context, Pipeline, Step};
use tracing::info;

use crate::config::{fetch_operator_config, validate_parameters};
use crate::keys::{INSTANCE, READY, RELEASE_GONE};
use crate::status::{check_readiness, mark_progressing};
use crate::steps::backup::{
    delete_backup_schedule, ensure_backup_schedule, ensure_repository_secret, fetch_bucket_secret,
};
use crate::steps::connection::{delete_connection_secret, ensure_connection_secret};
use crate::steps::credentials::ensure_credentials_secret;
use crate::steps::instance::{add_finalizer, assign_deployment_namespace, remove_finalizer};
use crate::steps::namespace::{delete_namespace, ensure_namespace};
use crate::steps::release::{delete_release, ensure_release};
use crate::steps::storage::ensure_storage_claim;

macro_rules! step {
    ($name:expr, $f:path) => {
        Step::new($name, |ctx| Box::pin($f(ctx)))
    };
}

fn backup_enabled(ctx: &Context) -> bool {
    ctx.try_get(INSTANCE).is_some_and(|i| i.spec.backup.enabled)
}

/// Re-mark Progressing when the spec changed or the instance is not Ready
fn needs_progressing(ctx: &Context) -> bool {
    let Some(instance) = ctx.try_get(INSTANCE) else {
        return true;
    };
    let Some(status) = instance.status.as_ref() else {
        return true;
    };
    status.observed_generation != instance.metadata.generation || !status.is_ready()
}

fn release_gone(ctx: &Context) -> bool {
    ctx.try_get(RELEASE_GONE).copied().unwrap_or(false)
}

/// Converge every dependent resource
pub fn converge() -> Pipeline {
    Pipeline::new("converge")
        .then(step!("ensure-namespace", ensure_namespace))
        .then(step!("ensure-storage-claim", ensure_storage_claim))
        .then(step!("ensure-credentials-secret", ensure_credentials_secret))
        .then(step!("ensure-release", ensure_release))
        .then(step!("ensure-connection-secret", ensure_connection_secret))
        .then(
            Branch::when(
                "backup-enabled",
                backup_enabled,
                Pipeline::new("backup")
                    .then(step!("fetch-bucket-secret", fetch_bucket_secret))
                    .then(step!("ensure-repository-secret", ensure_repository_secret))
                    .then(step!("ensure-backup-schedule", ensure_backup_schedule)),
            )
            .otherwise(step!("delete-backup-schedule", delete_backup_schedule)),
        )
}

fn readiness() -> Step {
    step!("check-readiness", check_readiness).with_result_handler(|path, ctx, result| {
        if result.is_ok() && ctx.try_get(READY) == Some(&true) {
            info!(step = %path, "instance converged and ready");
        }
    })
}

/// Provision a new instance
pub fn create() -> Pipeline {
    Pipeline::new("create")
        .then(step!("add-finalizer", add_finalizer))
        .then(step!("fetch-operator-config", fetch_operator_config))
        .then(step!("validate-parameters", validate_parameters))
        .then(step!("assign-deployment-namespace", assign_deployment_namespace))
        .then(step!("mark-progressing", mark_progressing))
        .then(converge())
        .then(readiness())
}

/// Converge a provisioned instance
pub fn update() -> Pipeline {
    Pipeline::new("update")
        .then(step!("fetch-operator-config", fetch_operator_config))
        .then(step!("validate-parameters", validate_parameters))
        .then(Branch::when(
            "spec-changed-or-not-ready",
            needs_progressing,
            step!("mark-progressing", mark_progressing),
        ))
        .then(converge())
        .then(readiness())
}

/// Tear an instance down in two phases.
///
/// The namespace and the finalizer are only removed once a run finds the
/// release already gone; until then each run re-issues the deletes.
pub fn delete() -> Pipeline {
    Pipeline::new("delete")
        .then(step!("delete-connection-secret", delete_connection_secret))
        .then(step!("delete-release", delete_release))
        .then(Branch::when(
            "release-gone",
            release_gone,
            Pipeline::new("finalize")
                .then(step!("delete-namespace", delete_namespace))
                .then(step!("remove-finalizer", remove_finalizer)),
        ))
}
