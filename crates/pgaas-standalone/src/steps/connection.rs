//! Connection secret in the instance namespace

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use pgaas_common::store::{create_or_update, delete_ignore_missing, ObjectKey};
use pgaas_common::{Error, Result};
use pgaas_pipeline::Context;
use tracing::{debug, info};

use super::credentials::{PASSWORD_KEY, SUPERUSER_PASSWORD_KEY};
use super::{dependent_meta, deployment_namespace, secret_value};
use crate::helm::FULLNAME_OVERRIDE;
use crate::keys::{CREDENTIALS, INSTANCE, STORE};

/// PostgreSQL service port
pub const POSTGRESQL_PORT: u16 = 5432;

/// Superuser password key, present only while superuser access is enabled
pub const SUPERUSER_CONNECTION_KEY: &str = "POSTGRESQL_POSTGRES_PASSWORD";

/// Ensure the connection secret in the instance namespace is current.
///
/// The secret is owned by the instance and garbage collected with it.
pub async fn ensure_connection_secret(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let deployment_ns = deployment_namespace(ctx)?;
    let instance = ctx.get(INSTANCE)?;
    let name = instance.name_any();
    let instance_ns = instance.namespace().ok_or_else(|| {
        Error::internal_with_context("connection-secret", format!("instance {name} has no namespace"))
    })?;
    let owner = instance.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context("connection-secret", format!("instance {name} has no uid"))
    })?;
    let secret_name = instance.connection_secret_name();
    let superuser = instance.spec.parameters.enable_super_user;

    let credentials = ctx.get(CREDENTIALS)?;
    let missing = |key: &str| {
        Error::not_found(
            format!("key {key} of Secret"),
            format!("{deployment_ns}/{}", credentials.name_any()),
        )
    };
    let password = secret_value(credentials, PASSWORD_KEY)?.ok_or_else(|| missing(PASSWORD_KEY))?;
    let superuser_password = if superuser {
        Some(
            secret_value(credentials, SUPERUSER_PASSWORD_KEY)?
                .ok_or_else(|| missing(SUPERUSER_PASSWORD_KEY))?,
        )
    } else {
        None
    };

    let service = format!("{FULLNAME_OVERRIDE}.{deployment_ns}.svc.cluster.local");
    let entries = BTreeMap::from([
        ("POSTGRESQL_SERVICE_NAME", service.clone()),
        ("POSTGRESQL_PORT", POSTGRESQL_PORT.to_string()),
        ("POSTGRESQL_USER", name.clone()),
        ("POSTGRESQL_DB", name.clone()),
        (
            "POSTGRESQL_URL",
            format!("postgres://{name}:{password}@{service}:{POSTGRESQL_PORT}/{name}"),
        ),
        ("POSTGRESQL_PASSWORD", password),
    ]);

    let secret = Secret {
        metadata: dependent_meta(ctx, Some(&instance_ns), &secret_name)?,
        ..Default::default()
    };
    let (_, result) = create_or_update(&store, secret, move |secret| {
        secret.metadata.owner_references = Some(vec![owner]);
        let data = secret.data.get_or_insert_with(Default::default);
        for (key, value) in entries {
            data.insert(key.to_string(), ByteString(value.into_bytes()));
        }
        match superuser_password {
            Some(pw) => {
                data.insert(SUPERUSER_CONNECTION_KEY.to_string(), ByteString(pw.into_bytes()));
            }
            None => {
                data.remove(SUPERUSER_CONNECTION_KEY);
            }
        }
        Ok(())
    })
    .await?;
    debug!(secret = %secret_name, result = %result, "connection secret converged");
    Ok(())
}

/// Delete the connection secret
pub async fn delete_connection_secret(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let instance = ctx.get(INSTANCE)?;
    let Some(namespace) = instance.namespace() else {
        return Ok(());
    };
    let key = ObjectKey::namespaced(namespace, instance.connection_secret_name());
    if delete_ignore_missing::<Secret>(&store, &key).await? {
        info!(secret = %key, "deleted connection secret");
    }
    Ok(())
}
