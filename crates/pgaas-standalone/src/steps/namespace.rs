//! Deployment namespace

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use pgaas_common::store::{create_or_update, delete_ignore_missing, ObjectKey};
use pgaas_common::Result;
use pgaas_pipeline::Context;
use tracing::{debug, info};

use super::{dependent_meta, deployment_namespace};
use crate::keys::{INSTANCE, INSTANCE_LABELS, STORE};

/// Ensure the deployment namespace exists and carries the instance labels.
///
/// Labels are merged into the existing set; labels added by others stay.
pub async fn ensure_namespace(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let name = deployment_namespace(ctx)?;
    let labels = ctx.get(INSTANCE_LABELS)?.clone();
    let namespace = Namespace {
        metadata: dependent_meta(ctx, None, &name)?,
        ..Default::default()
    };

    let (_, result) = create_or_update(&store, namespace, move |ns| {
        ns.labels_mut().extend(labels);
        Ok(())
    })
    .await?;
    debug!(namespace = %name, result = %result, "namespace converged");
    Ok(())
}

/// Delete the deployment namespace, if one was assigned
pub async fn delete_namespace(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let Some(name) = ctx.get(INSTANCE)?.deployment_namespace().map(str::to_string) else {
        return Ok(());
    };
    if delete_ignore_missing::<Namespace>(&store, &ObjectKey::cluster(&name)).await? {
        info!(namespace = %name, "deleted deployment namespace");
    }
    Ok(())
}
