//! Backup repository secret and schedule
//!
//! Backups go to the S3 bucket described by the bucket secret, which the
//! platform provisions into the deployment namespace. The repository
//! password is generated once and kept even while backups are disabled, so
//! existing snapshots stay readable when they are enabled again.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use pgaas_common::crd::{
    Backend, PruneJob, Retention, S3Backend, Schedule, ScheduleSpec, ScheduledJob,
    SecretKeySelector,
};
use pgaas_common::store::{create_or_update, delete_ignore_missing, ObjectKey};
use pgaas_common::{Error, Result};
use pgaas_pipeline::Context;
use tracing::{debug, info};

use super::{dependent_meta, deployment_namespace, secret_value};
use crate::keys::{BUCKET_SECRET, INSTANCE_LABELS, OPERATOR_CONFIG, RNG, STORE};
use crate::naming::generate_password;

/// Secret holding the backup repository password
pub const REPOSITORY_SECRET_NAME: &str = "k8up-repository-password";

/// The only key kept in the repository secret
pub const REPOSITORY_PASSWORD_KEY: &str = "password";

/// Name of the backup schedule
pub const SCHEDULE_NAME: &str = "postgresql";

/// Bucket secret key holding the S3 endpoint URL
pub const BUCKET_ENDPOINT_KEY: &str = "endpoint";

/// Bucket secret key holding the bucket name
pub const BUCKET_NAME_KEY: &str = "bucket";

/// Bucket secret key holding the access key id
pub const ACCESS_KEY_ID_KEY: &str = "AWS_ACCESS_KEY_ID";

/// Bucket secret key holding the secret access key
pub const SECRET_ACCESS_KEY_KEY: &str = "AWS_SECRET_ACCESS_KEY";

const BACKUP_SCHEDULE: &str = "@daily-random";
const MAINTENANCE_SCHEDULE: &str = "@weekly-random";
const KEEP_LAST: u32 = 30;

/// Read the bucket secret named by the operator config
pub async fn fetch_bucket_secret(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let namespace = deployment_namespace(ctx)?;
    let config = ctx.get(OPERATOR_CONFIG)?;
    let name = config.spec.backup_configuration.s3_bucket_secret.name.clone();
    if name.is_empty() {
        return Err(Error::validation_for_field(
            config.name_any(),
            "spec.backupConfiguration.s3BucketSecret.name",
            "bucket secret name is required when backups are enabled",
        ));
    }
    let secret: Secret = store.require(&ObjectKey::namespaced(&namespace, &name)).await?;
    ctx.set(BUCKET_SECRET, secret);
    Ok(())
}

/// Ensure the repository secret holds exactly one, stable password
pub async fn ensure_repository_secret(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let rng = ctx.get(RNG)?.clone();
    let namespace = deployment_namespace(ctx)?;
    let secret = Secret {
        metadata: dependent_meta(ctx, Some(&namespace), REPOSITORY_SECRET_NAME)?,
        ..Default::default()
    };

    let (_, result) = create_or_update(&store, secret, move |secret| {
        secret.string_data = None;
        let data = secret.data.get_or_insert_with(Default::default);
        data.retain(|key, _| key == REPOSITORY_PASSWORD_KEY);
        if data.get(REPOSITORY_PASSWORD_KEY).map_or(true, |v| v.0.is_empty()) {
            let password = generate_password(&mut *rng.lock());
            data.insert(REPOSITORY_PASSWORD_KEY.to_string(), ByteString(password.into_bytes()));
        }
        Ok(())
    })
    .await?;
    debug!(namespace = %namespace, result = %result, "repository secret converged");
    Ok(())
}

/// Ensure the backup schedule matches the platform's schedule exactly
pub async fn ensure_backup_schedule(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let namespace = deployment_namespace(ctx)?;
    let bucket = ctx.get(BUCKET_SECRET)?;
    let bucket_name = bucket.name_any();
    let required = |key: &str| -> Result<String> {
        secret_value(bucket, key)?.ok_or_else(|| {
            Error::not_found(
                format!("key {key} of Secret"),
                format!("{namespace}/{bucket_name}"),
            )
        })
    };
    let desired = schedule_spec(
        required(BUCKET_ENDPOINT_KEY)?,
        required(BUCKET_NAME_KEY)?,
        &bucket_name,
    );
    let labels = ctx.get(INSTANCE_LABELS)?.clone();
    let schedule = Schedule {
        metadata: dependent_meta(ctx, Some(&namespace), SCHEDULE_NAME)?,
        spec: ScheduleSpec::default(),
    };

    let (_, result) = create_or_update(&store, schedule, move |schedule| {
        schedule.spec = desired;
        schedule.labels_mut().extend(labels);
        Ok(())
    })
    .await?;
    debug!(namespace = %namespace, result = %result, "backup schedule converged");
    Ok(())
}

/// Delete the backup schedule; the repository secret is kept
pub async fn delete_backup_schedule(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let namespace = deployment_namespace(ctx)?;
    let key = ObjectKey::namespaced(&namespace, SCHEDULE_NAME);
    if delete_ignore_missing::<Schedule>(&store, &key).await? {
        info!(schedule = %key, "backups disabled, deleted schedule");
    }
    Ok(())
}

fn schedule_spec(endpoint: String, bucket: String, bucket_secret: &str) -> ScheduleSpec {
    let maintenance = || ScheduledJob {
        schedule: MAINTENANCE_SCHEDULE.to_string(),
    };
    ScheduleSpec {
        backend: Backend {
            repo_password_secret_ref: SecretKeySelector {
                name: REPOSITORY_SECRET_NAME.to_string(),
                key: REPOSITORY_PASSWORD_KEY.to_string(),
            },
            s3: S3Backend {
                endpoint,
                bucket,
                access_key_id_secret_ref: SecretKeySelector {
                    name: bucket_secret.to_string(),
                    key: ACCESS_KEY_ID_KEY.to_string(),
                },
                secret_access_key_secret_ref: SecretKeySelector {
                    name: bucket_secret.to_string(),
                    key: SECRET_ACCESS_KEY_KEY.to_string(),
                },
            },
        },
        backup: ScheduledJob {
            schedule: BACKUP_SCHEDULE.to_string(),
        },
        archive: maintenance(),
        prune: PruneJob {
            schedule: MAINTENANCE_SCHEDULE.to_string(),
            retention: Retention {
                keep_last: Some(KEEP_LAST),
            },
        },
        check: maintenance(),
    }
}
