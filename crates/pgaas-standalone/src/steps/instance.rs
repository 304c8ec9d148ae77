//! Finalizer and deployment namespace bookkeeping on the instance itself

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use pgaas_common::crd::DeploymentStrategy;
use pgaas_common::store::ObjectKey;
use pgaas_common::{Error, Result, FINALIZER};
use pgaas_pipeline::Context;
use tracing::{debug, info};

use crate::keys::{INSTANCE, RNG, STORE};
use crate::naming::deployment_namespace_name;
use crate::status::update_status;

const MAX_NAME_ATTEMPTS: usize = 10;

/// Add the operator finalizer to the instance
pub async fn add_finalizer(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let mut instance = ctx.get(INSTANCE)?.clone();
    if instance.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }
    instance.finalizers_mut().push(FINALIZER.to_string());
    let updated = store.update(&instance).await?;
    debug!(instance = %updated.name_any(), "added finalizer");
    ctx.set(INSTANCE, updated);
    Ok(())
}

/// Remove the operator finalizer, letting the API server delete the instance
pub async fn remove_finalizer(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let mut instance = ctx.get(INSTANCE)?.clone();
    if !instance.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }
    instance.finalizers_mut().retain(|f| f != FINALIZER);
    let updated = store.update(&instance).await?;
    info!(instance = %updated.name_any(), "removed finalizer");
    ctx.set(INSTANCE, updated);
    Ok(())
}

/// Pick a deployment namespace name and record it in status
///
/// The name is chosen once; later runs keep what status holds. A suggested
/// name that already exists is discarded and another one drawn.
pub async fn assign_deployment_namespace(ctx: &mut Context) -> Result<()> {
    if ctx.get(INSTANCE)?.deployment_namespace().is_some() {
        return Ok(());
    }
    let store = ctx.get(STORE)?.clone();
    let rng = ctx.get(RNG)?.clone();

    let mut chosen = None;
    for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate = deployment_namespace_name(&mut *rng.lock());
        if store
            .get::<Namespace>(&ObjectKey::cluster(&candidate))
            .await?
            .is_none()
        {
            chosen = Some(candidate);
            break;
        }
        debug!(namespace = %candidate, "namespace already exists, drawing another name");
    }
    let namespace = chosen.ok_or_else(|| {
        Error::internal_with_context(
            "deployment-namespace",
            format!("no free namespace name after {MAX_NAME_ATTEMPTS} attempts"),
        )
    })?;

    info!(namespace = %namespace, "assigned deployment namespace");
    update_status(ctx, move |status| {
        status.deployment_strategy = Some(DeploymentStrategy::HelmChart);
        status
            .helm_chart
            .get_or_insert_with(Default::default)
            .deployment_namespace = namespace;
    })
    .await
}
