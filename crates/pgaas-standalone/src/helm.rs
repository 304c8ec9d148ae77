//! Helm release values
//!
//! A new release starts from the operator config's template, adjusted by the
//! override entry for the template's chart version. Instance-derived values
//! are merged on top, both on creation and on every later reconcile.

use kube::ResourceExt;
use pgaas_common::crd::{ChartSpec, PostgresqlStandalone, PostgresqlStandaloneOperatorConfigSpec};
use pgaas_common::values::{merge, tree_from_value, ConfigTree};
use pgaas_common::{Error, Result};
use serde_json::json;

use crate::steps::credentials::credentials_secret_name;
use crate::steps::storage::STORAGE_CLAIM_NAME;

/// Release name override; the service is `postgresql.<namespace>`
pub const FULLNAME_OVERRIDE: &str = "postgresql";

/// Command run by the backup controller inside the database pod
pub const BACKUP_COMMAND: &str =
    "sh -c 'PGUSER=\"postgres\" PGPASSWORD=\"$POSTGRES_POSTGRES_PASSWORD\" pg_dump --clean \"$POSTGRES_DATABASE\"'";

/// File extension of backup dumps
pub const BACKUP_FILE_EXTENSION: &str = ".sql";

/// Chart and values of a release about to be created
///
/// When an override entry matches the template's chart version, its values
/// are merged onto the template if `mergeValuesFromTemplate` is set and
/// replace them otherwise. Non-empty chart repository and name of the
/// override win over the template's.
pub fn initial_values(config: &PostgresqlStandaloneOperatorConfigSpec) -> (ChartSpec, ConfigTree) {
    let template = &config.helm_release_template;
    let mut chart = template.chart.clone();
    let mut values = template.values.clone();

    if let Some(over) = config.override_for_template() {
        if over.merge_values_from_template {
            merge(&over.values, &mut values);
        } else {
            values = over.values.clone();
        }
        if !over.chart.repository.is_empty() {
            chart.repository = over.chart.repository.clone();
        }
        if !over.chart.name.is_empty() {
            chart.name = over.chart.name.clone();
        }
    }
    (chart, values)
}

/// Values derived from the instance, re-asserted on every reconcile
pub fn instance_values(instance: &PostgresqlStandalone) -> Result<ConfigTree> {
    let name = instance.name_any();
    let instance_namespace = instance.namespace().ok_or_else(|| {
        Error::internal_with_context("helm-values", format!("instance {name} has no namespace"))
    })?;

    let mut values = tree_from_value(json!({
        "fullnameOverride": FULLNAME_OVERRIDE,
        "auth": {
            "existingSecret": credentials_secret_name(&name),
            "database": name,
            "username": name,
            "enablePostgresUser": true,
        },
        "primary": {
            "persistence": {
                "existingClaim": STORAGE_CLAIM_NAME,
            },
            "podAnnotations": {
                "k8up.io/backupcommand": BACKUP_COMMAND,
                "k8up.io/file-extension": BACKUP_FILE_EXTENSION,
            },
        },
        "networkPolicy": {
            "enabled": true,
            "allowExternal": false,
            "explicitNamespacesSelector": {
                "matchLabels": {
                    "kubernetes.io/metadata.name": instance_namespace,
                },
            },
        },
    }))?;

    if let Some(memory) = &instance.spec.parameters.resources.memory_limit {
        let limits = tree_from_value(json!({
            "primary": { "resources": { "limits": { "memory": memory.0 } } }
        }))?;
        merge(&limits, &mut values);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use pgaas_common::crd::{HelmReleaseOverride, MajorVersion};
    use serde_json::Value;

    fn tree(value: Value) -> ConfigTree {
        tree_from_value(value).unwrap()
    }

    fn with_override(merge_values_from_template: bool) -> PostgresqlStandaloneOperatorConfigSpec {
        let mut spec = fixtures::operator_config(MajorVersion::V15).spec;
        spec.helm_releases = vec![
            HelmReleaseOverride {
                chart: ChartSpec {
                    version: "0.0.1".to_string(),
                    ..Default::default()
                },
                values: tree(json!({"image": {"tag": "ignored"}})),
                merge_values_from_template: true,
            },
            HelmReleaseOverride {
                chart: ChartSpec {
                    repository: String::new(),
                    name: "postgresql-fork".to_string(),
                    version: spec.helm_release_template.chart.version.clone(),
                },
                values: tree(json!({"image": {"tag": "15.4.0"}})),
                merge_values_from_template,
            },
        ];
        spec
    }

    #[test]
    fn template_only() {
        let spec = fixtures::operator_config(MajorVersion::V15).spec;
        let (chart, values) = initial_values(&spec);
        assert_eq!(chart, spec.helm_release_template.chart);
        assert_eq!(values, spec.helm_release_template.values);
    }

    #[test]
    fn merging_override_keeps_template_values() {
        let (chart, values) = initial_values(&with_override(true));
        assert_eq!(values["image"]["tag"], "15.4.0");
        assert_eq!(values["image"]["registry"], "docker.io");
        assert_eq!(chart.name, "postgresql-fork");
        assert_eq!(chart.repository, "https://charts.bitnami.com/bitnami");
    }

    #[test]
    fn replacing_override_drops_template_values() {
        let (_, values) = initial_values(&with_override(false));
        assert_eq!(Value::Object(values), json!({"image": {"tag": "15.4.0"}}));
    }

    #[test]
    fn instance_values_cover_auth_storage_and_network() {
        let values = instance_values(&fixtures::instance()).unwrap();

        assert_eq!(values["auth"]["existingSecret"], "orders-credentials");
        assert_eq!(values["auth"]["database"], "orders");
        assert_eq!(values["auth"]["enablePostgresUser"], true);
        assert_eq!(values["primary"]["resources"]["limits"]["memory"], "2Gi");
        assert_eq!(values["primary"]["persistence"]["existingClaim"], "postgresql-data");
        assert_eq!(values["primary"]["podAnnotations"]["k8up.io/file-extension"], ".sql");
        assert_eq!(values["fullnameOverride"], "postgresql");
        assert_eq!(
            values["networkPolicy"]["explicitNamespacesSelector"]["matchLabels"]
                ["kubernetes.io/metadata.name"],
            "team-a"
        );
    }

    #[test]
    fn memory_limit_is_optional() {
        let mut instance = fixtures::instance();
        instance.spec.parameters.resources.memory_limit = None;
        let values = instance_values(&instance).unwrap();
        assert!(values["primary"].get("resources").is_none());
    }
}
