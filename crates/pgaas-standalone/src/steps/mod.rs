//! Convergence steps
//!
//! Every step reads what it needs from the context, performs at most one
//! create-or-update (or delete, or read) against the store and writes what
//! later steps need back into the context. Steps are safe to re-run from
//! scratch; the platform retries by re-running the whole pipeline.

pub mod backup;
pub mod connection;
pub mod credentials;
pub mod instance;
pub mod namespace;
pub mod release;
pub mod storage;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use pgaas_common::{Error, Result};
use pgaas_pipeline::Context;

use crate::keys::{INSTANCE, INSTANCE_LABELS};

/// Deployment namespace assigned to the instance
///
/// Steps that run after assign-deployment-namespace rely on it; reaching
/// one without it is a wiring defect.
pub(crate) fn deployment_namespace(ctx: &Context) -> Result<String> {
    let instance = ctx.get(INSTANCE)?;
    instance
        .deployment_namespace()
        .map(str::to_string)
        .ok_or_else(|| {
            Error::internal_with_context(
                "deployment-namespace",
                format!("no deployment namespace assigned to {}", instance.name_any()),
            )
        })
}

/// Metadata for a dependent resource, labelled with the instance labels
pub(crate) fn dependent_meta(ctx: &Context, namespace: Option<&str>, name: &str) -> Result<ObjectMeta> {
    let labels: BTreeMap<String, String> = ctx.get(INSTANCE_LABELS)?.clone();
    Ok(ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        ..Default::default()
    })
}

/// UTF-8 value of a secret key, `None` when absent or empty
pub(crate) fn secret_value(secret: &Secret, key: &str) -> Result<Option<String>> {
    let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) else {
        return Ok(None);
    };
    if bytes.0.is_empty() {
        return Ok(None);
    }
    String::from_utf8(bytes.0.clone())
        .map(Some)
        .map_err(|e| Error::serialization_for_kind("Secret", format!("key {key} is not UTF-8: {e}")))
}
