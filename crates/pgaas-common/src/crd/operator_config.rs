//! PostgresqlStandaloneOperatorConfig Custom Resource Definition
//!
//! Platform defaults for one PostgreSQL major version. The operator selects
//! the config whose `postgresql.pgaas.dev/major-version` label matches the
//! instance; exactly one match is required.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{preserve_unknown_fields, SecretRef};

/// Resource bounds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBounds {
    /// Memory limit bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<Quantity>,

    /// Storage capacity bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_capacity: Option<Quantity>,
}

/// Helm chart coordinates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Chart repository URL
    #[serde(default)]
    pub repository: String,

    /// Chart name
    #[serde(default)]
    pub name: String,

    /// Chart version
    #[serde(default)]
    pub version: String,
}

/// Template for every Helm release of this major version
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseTemplate {
    /// Chart coordinates
    pub chart: ChartSpec,

    /// Base Helm values
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Per-chart-version override of the template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseOverride {
    /// Chart coordinates; `version` selects the override, empty
    /// repository/name keep the template's
    pub chart: ChartSpec,

    /// Override values
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: serde_json::Map<String, serde_json::Value>,

    /// Deep-merge `values` onto the template values instead of replacing them
    #[serde(default)]
    pub merge_values_from_template: bool,
}

/// Storage defaults for new data volumes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Storage class for new claims; cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Access modes for new claims
    #[serde(default)]
    pub access_modes: Vec<String>,
}

/// Backup destination settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfiguration {
    /// Secret holding `endpoint`, `bucket`, `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
    #[serde(default, rename = "s3BucketSecret")]
    pub s3_bucket_secret: SecretRef,
}

/// Specification for a PostgresqlStandaloneOperatorConfig
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "postgresql.pgaas.dev",
    version = "v1alpha1",
    kind = "PostgresqlStandaloneOperatorConfig",
    plural = "postgresqlstandaloneoperatorconfigs",
    shortname = "pgsconfig",
    namespaced,
    printcolumn = r#"{"name":"Chart","type":"string","jsonPath":".spec.helmReleaseTemplate.chart.name"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.helmReleaseTemplate.chart.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlStandaloneOperatorConfigSpec {
    /// Lower bounds for instance sizing
    #[serde(default)]
    pub resource_minima: ResourceBounds,

    /// Upper bounds for instance sizing
    #[serde(default)]
    pub resource_maxima: ResourceBounds,

    /// Template applied when a release is first created
    #[serde(default)]
    pub helm_release_template: HelmReleaseTemplate,

    /// Per-chart-version overrides of the template
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helm_releases: Vec<HelmReleaseOverride>,

    /// Name of the Helm provider config used by releases
    #[serde(default)]
    pub helm_provider_config_reference: String,

    /// Storage defaults
    #[serde(default)]
    pub persistence: PersistenceSpec,

    /// Backup destination settings
    #[serde(default)]
    pub backup_configuration: BackupConfiguration,
}

impl PostgresqlStandaloneOperatorConfigSpec {
    /// Override entry whose chart version matches the template's version
    pub fn override_for_template(&self) -> Option<&HelmReleaseOverride> {
        let version = &self.helm_release_template.chart.version;
        self.helm_releases
            .iter()
            .find(|r| &r.chart.version == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parses_free_form_values() {
        let spec: PostgresqlStandaloneOperatorConfigSpec = serde_yaml::from_str(
            r#"
resourceMaxima:
  memoryLimit: 4Gi
helmReleaseTemplate:
  chart:
    repository: https://charts.bitnami.com/bitnami
    name: postgresql
    version: 11.1.23
  values:
    image:
      tag: "14.5"
    primary:
      resources: {}
helmReleases:
  - chart:
      version: 11.1.23
    values:
      image:
        tag: "14.6"
    mergeValuesFromTemplate: true
helmProviderConfigReference: helm-provider
persistence:
  storageClassName: ssd
  accessModes: [ReadWriteOnce]
backupConfiguration:
  s3BucketSecret:
    name: pg-bucket
"#,
        )
        .expect("parse spec");

        assert_eq!(spec.helm_release_template.values["image"]["tag"], "14.5");
        assert_eq!(spec.persistence.access_modes, vec!["ReadWriteOnce"]);
        assert_eq!(spec.backup_configuration.s3_bucket_secret.name, "pg-bucket");

        let ov = spec.override_for_template().expect("override");
        assert!(ov.merge_values_from_template);
        assert!(ov.chart.repository.is_empty());
    }

    #[test]
    fn override_requires_matching_version() {
        let spec = PostgresqlStandaloneOperatorConfigSpec {
            helm_release_template: HelmReleaseTemplate {
                chart: ChartSpec {
                    version: "1.0.0".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            helm_releases: vec![HelmReleaseOverride {
                chart: ChartSpec {
                    version: "2.0.0".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(spec.override_for_template().is_none());
    }
}
