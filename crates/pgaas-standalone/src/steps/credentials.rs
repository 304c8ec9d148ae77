//! Database credentials secret
//!
//! Passwords are generated once. A key that already holds a value is never
//! rotated by the operator.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use pgaas_common::store::create_or_update;
use pgaas_common::Result;
use pgaas_pipeline::Context;
use tracing::debug;

use super::{dependent_meta, deployment_namespace};
use crate::keys::{CREDENTIALS, INSTANCE, RNG, STORE};
use crate::naming::generate_password;

/// Password of the application user
pub const PASSWORD_KEY: &str = "password";

/// Password of the `postgres` superuser
pub const SUPERUSER_PASSWORD_KEY: &str = "postgres-password";

/// Keys generated in the credentials secret
pub const CREDENTIAL_KEYS: [&str; 2] = [PASSWORD_KEY, SUPERUSER_PASSWORD_KEY];

/// Name of the credentials secret of an instance
pub fn credentials_secret_name(instance: &str) -> String {
    format!("{instance}-credentials")
}

/// Ensure the credentials secret holds a password for every credential key
pub async fn ensure_credentials_secret(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let rng = ctx.get(RNG)?.clone();
    let namespace = deployment_namespace(ctx)?;
    let name = credentials_secret_name(&ctx.get(INSTANCE)?.name_any());
    let secret = Secret {
        metadata: dependent_meta(ctx, Some(&namespace), &name)?,
        ..Default::default()
    };

    let (secret, result) = create_or_update(&store, secret, move |secret| {
        let data = secret.data.get_or_insert_with(Default::default);
        let mut rng = rng.lock();
        for key in CREDENTIAL_KEYS {
            let present = data.get(key).is_some_and(|v| !v.0.is_empty());
            if !present {
                data.insert(key.to_string(), ByteString(generate_password(&mut *rng).into_bytes()));
            }
        }
        Ok(())
    })
    .await?;
    debug!(secret = %name, result = %result, "credentials secret converged");
    ctx.set(CREDENTIALS, secret);
    Ok(())
}
