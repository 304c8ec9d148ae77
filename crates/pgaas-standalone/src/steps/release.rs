//! Helm release
//!
//! The release is cluster-scoped and named after the deployment namespace.
//! On creation its values come from the operator config template (see
//! [`crate::helm::initial_values`]). Afterwards the template is never
//! re-applied: the stored values are read back and only the instance-derived
//! values are merged onto them again, so pinned template values such as
//! image tags do not move on unrelated updates.

use chrono::SubsecRound;
use kube::ResourceExt;
use pgaas_common::crd::{ProviderConfigReference, Release, ReleaseSpec};
use pgaas_common::store::{create_or_update, delete_ignore_missing, is_new, ObjectKey};
use pgaas_common::values::{merge, values_hash};
use pgaas_common::Result;
use pgaas_pipeline::Context;
use tracing::{debug, info};

use super::{dependent_meta, deployment_namespace};
use crate::helm::{initial_values, instance_values};
use crate::keys::{INSTANCE, NOW, OPERATOR_CONFIG, RELEASE, RELEASE_GONE, STORE};
use crate::status::update_status;

/// Ensure the Helm release exists with the instance values applied.
///
/// Records chart coordinates and the hash of the applied values in status.
/// The hash is taken from the values as written, after the instance values
/// are merged, so it changes exactly when the release's values change.
/// When it differs from the recorded one, `modifiedTime` moves to now,
/// truncated to whole seconds like provider condition timestamps; readiness
/// reported before that time is ignored.
pub async fn ensure_release(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let namespace = deployment_namespace(ctx)?;
    let now = *ctx.get(NOW)?;
    let config = ctx.get(OPERATOR_CONFIG)?.spec.clone();
    let overlay = instance_values(ctx.get(INSTANCE)?)?;

    let mut release = Release::new(&namespace, ReleaseSpec::default());
    release.metadata = dependent_meta(ctx, None, &namespace)?;
    let labels = release.labels().clone();

    let target_namespace = namespace.clone();
    let (release, result) = create_or_update(&store, release, move |release| {
        if is_new(release) {
            let (chart, mut values) = initial_values(&config);
            merge(&overlay, &mut values);
            release.spec.for_provider.chart = chart;
            release.spec.for_provider.values = values;
        } else {
            merge(&overlay, &mut release.spec.for_provider.values);
        }
        release.spec.for_provider.namespace = target_namespace;
        release.spec.provider_config_ref = Some(ProviderConfigReference {
            name: config.helm_provider_config_reference,
        });
        release.labels_mut().extend(labels);
        Ok(())
    })
    .await?;
    debug!(release = %release.name_any(), result = %result, "release converged");

    let hash = values_hash(&release.spec.for_provider.values)?;
    let chart = release.spec.for_provider.chart.clone();
    update_status(ctx, move |status| {
        let helm = status.helm_chart.get_or_insert_with(Default::default);
        if helm.values_hash != hash {
            info!(release = %namespace, hash = %hash, "release values changed");
            helm.values_hash = hash;
            helm.modified_time = Some(now.trunc_subsecs(0));
        }
        helm.repository = chart.repository;
        helm.name = chart.name;
        helm.version = chart.version;
        helm.deployment_namespace = namespace;
    })
    .await?;

    ctx.set(RELEASE, release);
    Ok(())
}

/// Delete the Helm release and record whether it is confirmed gone.
///
/// A delete that found the release means its provider is still tearing it
/// down; only a later run that finds nothing confirms it gone. Without a
/// deployment namespace nothing was ever released.
pub async fn delete_release(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let Some(name) = ctx.get(INSTANCE)?.deployment_namespace().map(str::to_string) else {
        ctx.set(RELEASE_GONE, true);
        return Ok(());
    };
    let existed = delete_ignore_missing::<Release>(&store, &ObjectKey::cluster(&name)).await?;
    if existed {
        info!(release = %name, "deleting release");
    }
    ctx.set(RELEASE_GONE, !existed);
    Ok(())
}
