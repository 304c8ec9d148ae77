//! K8up backup schedule resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to one key of a secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,
    /// Key within the secret
    pub key: String,
}

/// S3 backend coordinates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Backend {
    /// S3 endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key reference
    #[serde(rename = "accessKeyIDSecretRef")]
    pub access_key_id_secret_ref: SecretKeySelector,
    /// Secret key reference
    pub secret_access_key_secret_ref: SecretKeySelector,
}

/// Backup repository backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Repository encryption password
    pub repo_password_secret_ref: SecretKeySelector,
    /// S3 storage
    pub s3: S3Backend,
}

/// Cron-like schedule of one operation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ScheduledJob {
    /// Schedule expression
    pub schedule: String,
}

/// Snapshot retention
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    /// Number of most recent snapshots to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<u32>,
}

/// Prune schedule with retention
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PruneJob {
    /// Schedule expression
    pub schedule: String,
    /// Retention policy
    #[serde(default)]
    pub retention: Retention,
}

/// Schedule spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(group = "k8up.io", version = "v1", kind = "Schedule", plural = "schedules", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Repository backend
    pub backend: Backend,
    /// Backup schedule
    pub backup: ScheduledJob,
    /// Archive schedule
    pub archive: ScheduledJob,
    /// Prune schedule
    pub prune: PruneJob,
    /// Repository check schedule
    pub check: ScheduledJob,
}
