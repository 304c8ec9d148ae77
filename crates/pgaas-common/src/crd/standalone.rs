//! PostgresqlStandalone Custom Resource Definition
//!
//! A PostgresqlStandalone is one single-node PostgreSQL service instance.
//! The operator provisions a deployment namespace, storage, credentials, a
//! Helm release and an optional backup schedule for it, then reports
//! readiness through status conditions.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{find_condition, Condition, CONDITION_READY};

/// Supported PostgreSQL major versions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum MajorVersion {
    /// PostgreSQL 14
    #[serde(rename = "v14")]
    V14,
    /// PostgreSQL 15
    #[default]
    #[serde(rename = "v15")]
    V15,
    /// PostgreSQL 16
    #[serde(rename = "v16")]
    V16,
}

impl MajorVersion {
    /// Label value used to select the matching operator config
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V14 => "v14",
            Self::V15 => "v15",
            Self::V16 => "v16",
        }
    }
}

impl std::fmt::Display for MajorVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MajorVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v14" => Ok(Self::V14),
            "v15" => Ok(Self::V15),
            "v16" => Ok(Self::V16),
            _ => Err(crate::Error::validation(format!(
                "invalid major version: {s}, expected one of: v14, v15, v16"
            ))),
        }
    }
}

/// Compute and storage sizing
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Memory limit of the database container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<Quantity>,

    /// Requested size of the data volume; may only grow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_capacity: Option<Quantity>,
}

/// Database parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    /// PostgreSQL major version; immutable once set
    #[serde(default)]
    pub major_version: MajorVersion,

    /// Compute and storage sizing
    #[serde(default)]
    pub resources: Resources,

    /// Expose the `postgres` superuser password in the connection secret
    #[serde(default)]
    pub enable_super_user: bool,
}

/// Backup settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Schedule periodic backups of the database
    #[serde(default)]
    pub enabled: bool,
}

/// Where to write the connection secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSecretRef {
    /// Secret name in the instance namespace
    #[serde(default)]
    pub name: String,
}

/// Specification for a PostgresqlStandalone
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "postgresql.pgaas.dev",
    version = "v1alpha1",
    kind = "PostgresqlStandalone",
    plural = "postgresqlstandalones",
    shortname = "pgs",
    namespaced,
    status = "PostgresqlStandaloneStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.parameters.majorVersion"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".status.helmChart.deploymentNamespace"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlStandaloneSpec {
    /// Database parameters
    #[serde(default)]
    pub parameters: Parameters,

    /// Backup settings
    #[serde(default)]
    pub backup: BackupSpec,

    /// Connection secret destination
    #[serde(default)]
    pub write_connection_secret_to_ref: ConnectionSecretRef,
}

/// How the database is deployed
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeploymentStrategy {
    /// Deployed through a Helm release
    #[default]
    HelmChart,
}

/// Metadata of the deployed chart
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartStatus {
    /// Chart repository URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,

    /// Chart name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Chart version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Generated namespace holding the deployment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_namespace: String,

    /// Last time the release values changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,

    /// Hash of the last applied release values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values_hash: String,
}

/// Status of a PostgresqlStandalone
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlStandaloneStatus {
    /// How the database is deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_strategy: Option<DeploymentStrategy>,

    /// Deployed chart metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_chart: Option<HelmChartStatus>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl PostgresqlStandaloneStatus {
    /// Generated deployment namespace, if one was assigned
    pub fn deployment_namespace(&self) -> Option<&str> {
        self.helm_chart
            .as_ref()
            .map(|h| h.deployment_namespace.as_str())
            .filter(|ns| !ns.is_empty())
    }

    /// True if the Ready condition is set to True
    pub fn is_ready(&self) -> bool {
        find_condition(&self.conditions, CONDITION_READY).is_some_and(|c| c.is_true())
    }
}

impl PostgresqlStandalone {
    /// Generated deployment namespace, if one was assigned
    pub fn deployment_namespace(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(PostgresqlStandaloneStatus::deployment_namespace)
    }

    /// Connection secret name, falling back to the instance name
    pub fn connection_secret_name(&self) -> String {
        let name = &self.spec.write_connection_secret_to_ref.name;
        if name.is_empty() {
            self.metadata.name.clone().unwrap_or_default()
        } else {
            name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn parse_spec(yaml: &str) -> PostgresqlStandaloneSpec {
        serde_yaml::from_str(yaml).expect("parse spec")
    }

    #[test]
    fn spec_parses_camel_case() {
        let spec = parse_spec(
            r#"
parameters:
  majorVersion: v16
  resources:
    memoryLimit: 256Mi
    storageCapacity: 1Gi
  enableSuperUser: true
backup:
  enabled: true
writeConnectionSecretToRef:
  name: my-db-conn
"#,
        );

        assert_eq!(spec.parameters.major_version, MajorVersion::V16);
        assert_eq!(
            spec.parameters.resources.storage_capacity,
            Some(Quantity("1Gi".to_string()))
        );
        assert!(spec.parameters.enable_super_user);
        assert!(spec.backup.enabled);
        assert_eq!(spec.write_connection_secret_to_ref.name, "my-db-conn");
    }

    #[test]
    fn unknown_major_version_is_rejected() {
        assert!("v13".parse::<MajorVersion>().is_err());
        assert_eq!("v14".parse::<MajorVersion>().unwrap(), MajorVersion::V14);
        assert!(serde_yaml::from_str::<PostgresqlStandaloneSpec>(
            "parameters:\n  majorVersion: v9\n"
        )
        .is_err());
    }

    #[test]
    fn connection_secret_name_falls_back_to_instance_name() {
        let mut instance = PostgresqlStandalone::new("my-db", PostgresqlStandaloneSpec::default());
        assert_eq!(instance.connection_secret_name(), "my-db");

        instance.spec.write_connection_secret_to_ref.name = "explicit".to_string();
        assert_eq!(instance.connection_secret_name(), "explicit");
    }

    #[test]
    fn empty_deployment_namespace_counts_as_unassigned() {
        let mut instance = PostgresqlStandalone::new("my-db", PostgresqlStandaloneSpec::default());
        assert_eq!(instance.deployment_namespace(), None);

        instance.status = Some(PostgresqlStandaloneStatus {
            helm_chart: Some(HelmChartStatus::default()),
            ..Default::default()
        });
        assert_eq!(instance.deployment_namespace(), None);

        instance.status = Some(PostgresqlStandaloneStatus {
            helm_chart: Some(HelmChartStatus {
                deployment_namespace: "sv-postgresql-s-abc".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(instance.deployment_namespace(), Some("sv-postgresql-s-abc"));
    }

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = PostgresqlStandalone::crd();
        assert_eq!(crd.spec.group, "postgresql.pgaas.dev");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "PostgresqlStandalone");
    }
}
