//! Data volume claim

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use pgaas_common::store::{create_or_update, is_new};
use pgaas_common::{Error, Result};
use pgaas_pipeline::Context;
use tracing::debug;

use super::{dependent_meta, deployment_namespace};
use crate::keys::{INSTANCE, OPERATOR_CONFIG, STORE};

/// Name of the claim the chart mounts as its data volume
pub const STORAGE_CLAIM_NAME: &str = "postgresql-data";

/// Access mode used when the operator config names none
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Ensure the data claim exists with the requested size.
///
/// Access modes and storage class are only set on creation. Every run
/// overwrites `spec.resources.requests.storage` and nothing else.
pub async fn ensure_storage_claim(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let namespace = deployment_namespace(ctx)?;
    let instance = ctx.get(INSTANCE)?;
    let capacity = instance
        .spec
        .parameters
        .resources
        .storage_capacity
        .clone()
        .ok_or_else(|| {
            Error::validation_for_field(
                instance.name_any(),
                "spec.parameters.resources.storageCapacity",
                "storage capacity is required",
            )
        })?;
    let persistence = ctx.get(OPERATOR_CONFIG)?.spec.persistence.clone();
    let claim = PersistentVolumeClaim {
        metadata: dependent_meta(ctx, Some(&namespace), STORAGE_CLAIM_NAME)?,
        ..Default::default()
    };

    let (_, result) = create_or_update(&store, claim, move |claim| {
        let created = is_new(claim);
        let spec = claim.spec.get_or_insert_with(Default::default);
        if created {
            spec.access_modes = Some(if persistence.access_modes.is_empty() {
                vec![DEFAULT_ACCESS_MODE.to_string()]
            } else {
                persistence.access_modes
            });
            spec.storage_class_name = persistence.storage_class_name;
        }
        spec.resources
            .get_or_insert_with(Default::default)
            .requests
            .get_or_insert_with(Default::default)
            .insert("storage".to_string(), capacity);
        Ok(())
    })
    .await?;
    debug!(namespace = %namespace, result = %result, "storage claim converged");
    Ok(())
}
