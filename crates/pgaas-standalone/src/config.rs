//! Operator config lookup and instance sizing bounds

use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use pgaas_common::crd::{PostgresqlStandalone, PostgresqlStandaloneOperatorConfig, PostgresqlStandaloneOperatorConfigSpec};
use pgaas_common::quantity::compare;
use pgaas_common::{Error, Result, MAJOR_VERSION_LABEL};
use pgaas_pipeline::Context;
use tracing::debug;

use crate::keys::{INSTANCE, OPERATOR_CONFIG, OPERATOR_NAMESPACE, STORE};

/// Fetch the one operator config labelled with the instance's major version
pub async fn fetch_operator_config(ctx: &mut Context) -> Result<()> {
    let store = ctx.get(STORE)?.clone();
    let namespace = ctx.get(OPERATOR_NAMESPACE)?.clone();
    let major_version = ctx.get(INSTANCE)?.spec.parameters.major_version;

    let selector = format!("{MAJOR_VERSION_LABEL}={major_version}");
    let mut configs: Vec<PostgresqlStandaloneOperatorConfig> =
        store.list(Some(&namespace), Some(&selector)).await?;
    if configs.len() != 1 {
        return Err(Error::OperatorConfigLookup {
            major_version: major_version.to_string(),
            found: configs.len(),
        });
    }
    let config = configs.remove(0);
    debug!(config = %config.name_any(), version = %major_version, "using operator config");
    ctx.set(OPERATOR_CONFIG, config);
    Ok(())
}

/// Reject instances sized outside the operator config's minima and maxima
pub async fn validate_parameters(ctx: &mut Context) -> Result<()> {
    let instance = ctx.get(INSTANCE)?;
    let config = ctx.get(OPERATOR_CONFIG)?;
    validate_bounds(instance, &config.spec)
}

/// Check memory and storage against the configured bounds; unset bounds and
/// unset instance values are not checked
pub fn validate_bounds(
    instance: &PostgresqlStandalone,
    config: &PostgresqlStandaloneOperatorConfigSpec,
) -> Result<()> {
    let name = instance.name_any();
    let resources = &instance.spec.parameters.resources;
    check_bound(
        &name,
        "spec.parameters.resources.memoryLimit",
        resources.memory_limit.as_ref(),
        config.resource_minima.memory_limit.as_ref(),
        config.resource_maxima.memory_limit.as_ref(),
    )?;
    check_bound(
        &name,
        "spec.parameters.resources.storageCapacity",
        resources.storage_capacity.as_ref(),
        config.resource_minima.storage_capacity.as_ref(),
        config.resource_maxima.storage_capacity.as_ref(),
    )
}

fn check_bound(
    instance: &str,
    field: &str,
    value: Option<&Quantity>,
    min: Option<&Quantity>,
    max: Option<&Quantity>,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if let Some(min) = min {
        if compare(value, min)? == Ordering::Less {
            return Err(Error::validation_for_field(
                instance,
                field,
                format!("{} is below the minimum of {}", value.0, min.0),
            ));
        }
    }
    if let Some(max) = max {
        if compare(value, max)? == Ordering::Greater {
            return Err(Error::validation_for_field(
                instance,
                field,
                format!("{} is above the maximum of {}", value.0, max.0),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Harness};
    use pgaas_common::crd::MajorVersion;
    use rstest::rstest;

    #[tokio::test]
    async fn exactly_one_config_is_selected() {
        let harness = Harness::new();
        let mut ctx = harness.context();

        fetch_operator_config(&mut ctx).await.unwrap();
        let config = ctx.get(OPERATOR_CONFIG).unwrap();
        assert_eq!(config.name_any(), "postgresql-v15");
    }

    #[tokio::test]
    async fn missing_config_is_a_lookup_error() {
        let harness = Harness::new();
        let mut instance = harness.instance();
        instance.spec.parameters.major_version = MajorVersion::V14;
        let mut ctx = harness.context();
        ctx.set(INSTANCE, instance);

        let err = fetch_operator_config(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::OperatorConfigLookup { found: 0, .. }));
        assert!(!ctx.contains(OPERATOR_CONFIG));
    }

    #[tokio::test]
    async fn duplicate_configs_are_a_lookup_error() {
        let harness = Harness::new();
        let mut duplicate = fixtures::operator_config(MajorVersion::V15);
        duplicate.metadata.name = Some("postgresql-v15-copy".to_string());
        harness.memory.seed(&duplicate);
        let mut ctx = harness.context();

        let err = fetch_operator_config(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::OperatorConfigLookup { found: 2, .. }));
        assert!(err.is_retryable());
    }

    #[rstest]
    #[case("1Gi", "10Gi", true)]
    #[case("512Mi", "10Gi", false)]
    #[case("1Gi", "200Gi", false)]
    #[case("2Gi", "100Gi", true)]
    fn bounds(#[case] memory: &str, #[case] storage: &str, #[case] ok: bool) {
        let mut instance = fixtures::instance();
        instance.spec.parameters.resources.memory_limit = Some(Quantity(memory.to_string()));
        instance.spec.parameters.resources.storage_capacity = Some(Quantity(storage.to_string()));
        let config = fixtures::operator_config(MajorVersion::V15);

        assert_eq!(validate_bounds(&instance, &config.spec).is_ok(), ok);
    }

    #[test]
    fn bound_errors_name_the_field() {
        let mut instance = fixtures::instance();
        instance.spec.parameters.resources.storage_capacity = Some(Quantity("1Ti".to_string()));
        let config = fixtures::operator_config(MajorVersion::V15);

        match validate_bounds(&instance, &config.spec).unwrap_err() {
            Error::Validation { field, message, .. } => {
                assert_eq!(field.as_deref(), Some("spec.parameters.resources.storageCapacity"));
                assert!(message.contains("maximum"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
