//! CRD generation and installation
//!
//! The operator installs the CRDs it owns on startup using server-side
//! apply, so the schema always matches the running version. `Release` and
//! `Schedule` belong to their providers and are never installed here.

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use pgaas_common::crd::{PostgresqlStandalone, PostgresqlStandaloneOperatorConfig};
use pgaas_common::retry::{retry_with_backoff, RetryConfig};

use crate::cli::CONTROLLER_NAME;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn owned_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: PostgresqlStandalone::crd_name(),
            crd: PostgresqlStandalone::crd(),
        },
        CrdDef {
            name: PostgresqlStandaloneOperatorConfig::crd_name(),
            crd: PostgresqlStandaloneOperatorConfig::crd(),
        },
    ]
}

/// All owned CRDs as a multi-document YAML stream
pub fn crd_yaml() -> anyhow::Result<String> {
    let mut out = String::new();
    for def in owned_crds() {
        out.push_str("---\n");
        out.push_str(
            &serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?,
        );
    }
    Ok(out)
}

fn retryable(e: &kube::Error) -> bool {
    !matches!(e, kube::Error::Api(ae) if matches!(ae.code, 400 | 401 | 403 | 422))
}

/// Install or update every owned CRD, retrying transient API errors
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();
    let retry = RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_millis(500),
        ..RetryConfig::default()
    };

    for def in owned_crds() {
        tracing::info!(crd = def.name, "installing CRD");
        let patch = Patch::Apply(&def.crd);
        retry_with_backoff(&retry, def.name, retryable, || {
            crds.patch(def.name, &params, &patch)
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    tracing::info!("CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_contains_both_owned_crds() {
        let yaml = crd_yaml().unwrap();
        assert!(yaml.contains("name: postgresqlstandalones.postgresql.pgaas.dev"));
        assert!(yaml.contains("name: postgresqlstandaloneoperatorconfigs.postgresql.pgaas.dev"));
        assert!(!yaml.contains("helm.crossplane.io"));
        assert_eq!(yaml.matches("---\n").count(), 2);
    }

    #[test]
    fn crd_names_follow_plural_and_group() {
        let names: Vec<_> = owned_crds().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "postgresqlstandalones.postgresql.pgaas.dev",
                "postgresqlstandaloneoperatorconfigs.postgresql.pgaas.dev",
            ]
        );
    }

    #[test]
    fn client_errors_are_not_retried() {
        let forbidden = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        let throttled = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "slow down".to_string(),
            reason: "TooManyRequests".to_string(),
            code: 429,
        });
        assert!(!retryable(&forbidden));
        assert!(retryable(&throttled));
    }
}
