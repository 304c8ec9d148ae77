//! Admission rules for PostgresqlStandalone
//!
//! Both rules are pure functions over the desired state. The defaulter
//! produces JSON patch operations; the validator guards the two invariants
//! the controller relies on: the major version never changes and storage
//! never shrinks.

use std::cmp::Ordering;

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::ResourceExt;
use pgaas_common::crd::PostgresqlStandalone;
use pgaas_common::quantity::compare;
use pgaas_common::{Error, Result};

const MAJOR_VERSION_FIELD: &str = "spec.parameters.majorVersion";
const STORAGE_CAPACITY_FIELD: &str = "spec.parameters.resources.storageCapacity";

/// Patch filling an empty connection secret name with the instance name
pub fn defaults(instance: &PostgresqlStandalone) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    let name = instance.name_any();
    if instance.spec.write_connection_secret_to_ref.name.is_empty() && !name.is_empty() {
        ops.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "writeConnectionSecretToRef"]),
            value: serde_json::json!({ "name": name }),
        }));
    }
    ops
}

/// Validate a create (`old` is `None`) or an update
pub fn validate(old: Option<&PostgresqlStandalone>, new: &PostgresqlStandalone) -> Result<()> {
    let Some(old) = old else {
        return Ok(());
    };
    let name = new.name_any();

    let (was, is) = (
        old.spec.parameters.major_version,
        new.spec.parameters.major_version,
    );
    if was != is {
        return Err(Error::validation_for_field(
            name,
            MAJOR_VERSION_FIELD,
            format!("major version is immutable: cannot change {was} to {is}"),
        ));
    }

    let resources = (
        old.spec.parameters.resources.storage_capacity.as_ref(),
        new.spec.parameters.resources.storage_capacity.as_ref(),
    );
    match resources {
        (Some(was), Some(is)) => {
            if compare(is, was)? == Ordering::Less {
                return Err(Error::validation_for_field(
                    name,
                    STORAGE_CAPACITY_FIELD,
                    format!("storage capacity cannot decrease from {} to {}", was.0, is.0),
                ));
            }
        }
        (Some(was), None) => {
            return Err(Error::validation_for_field(
                name,
                STORAGE_CAPACITY_FIELD,
                format!("storage capacity cannot be removed once set (was {})", was.0),
            ));
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use pgaas_common::crd::{MajorVersion, PostgresqlStandaloneSpec};
    use rstest::rstest;

    fn instance(version: MajorVersion, storage: Option<&str>) -> PostgresqlStandalone {
        let mut spec = PostgresqlStandaloneSpec::default();
        spec.parameters.major_version = version;
        spec.parameters.resources.storage_capacity = storage.map(|s| Quantity(s.to_string()));
        PostgresqlStandalone::new("orders", spec)
    }

    #[test]
    fn empty_connection_secret_defaults_to_instance_name() {
        let ops = defaults(&instance(MajorVersion::V15, None));
        assert_eq!(ops.len(), 1);
        let PatchOperation::Add(add) = &ops[0] else {
            panic!("expected an add operation");
        };
        assert_eq!(add.path.as_str(), "/spec/writeConnectionSecretToRef");
        assert_eq!(add.value, serde_json::json!({"name": "orders"}));
    }

    #[test]
    fn explicit_connection_secret_is_kept() {
        let mut named = instance(MajorVersion::V15, None);
        named.spec.write_connection_secret_to_ref.name = "creds".to_string();
        assert!(defaults(&named).is_empty());
    }

    #[test]
    fn creates_are_always_valid() {
        assert!(validate(None, &instance(MajorVersion::V14, Some("1Gi"))).is_ok());
    }

    #[test]
    fn major_version_is_immutable() {
        let err = validate(
            Some(&instance(MajorVersion::V14, None)),
            &instance(MajorVersion::V15, None),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation { field: Some(ref f), .. } if f == MAJOR_VERSION_FIELD
        ));
    }

    #[rstest]
    #[case(Some("10Gi"), Some("10Gi"), true)]
    #[case(Some("10Gi"), Some("20Gi"), true)]
    #[case(Some("10Gi"), Some("10240Mi"), true)]
    #[case(Some("10Gi"), Some("9Gi"), false)]
    #[case(Some("1Gi"), Some("1G"), false)]
    #[case(None, Some("5Gi"), true)]
    #[case(None, None, true)]
    #[case(Some("10Gi"), None, false)]
    fn storage_never_shrinks(
        #[case] old: Option<&str>,
        #[case] new: Option<&str>,
        #[case] allowed: bool,
    ) {
        let result = validate(
            Some(&instance(MajorVersion::V15, old)),
            &instance(MajorVersion::V15, new),
        );
        assert_eq!(result.is_ok(), allowed, "{old:?} -> {new:?}: {result:?}");
    }

    #[test]
    fn unparseable_storage_is_rejected() {
        let result = validate(
            Some(&instance(MajorVersion::V15, Some("10Gi"))),
            &instance(MajorVersion::V15, Some("lots")),
        );
        assert!(matches!(result, Err(Error::Validation { .. })));
    }
}
