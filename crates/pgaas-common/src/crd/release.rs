//! Helm release resource of the Crossplane Helm provider
//!
//! The operator only writes the spec; the provider's controller installs the
//! chart and reports `Synced`/`Ready` conditions back. Spec fields the
//! operator does not manage (`deletionPolicy`, `managementPolicies`,
//! `forProvider.set`, `forProvider.wait`, ...) are carried through reads and
//! writes untouched.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::operator_config::ChartSpec;
use super::types::{find_condition, preserve_unknown_fields, Condition, CONDITION_READY, CONDITION_SYNCED};

/// What the provider should install
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseParameters {
    /// Chart coordinates
    pub chart: ChartSpec,

    /// Target namespace of the chart
    pub namespace: String,

    /// Helm values
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: serde_json::Map<String, serde_json::Value>,

    /// Provider fields not managed by this operator
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Provider credentials reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProviderConfigReference {
    /// Name of the provider config
    pub name: String,
}

/// Release spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "helm.crossplane.io",
    version = "v1beta1",
    kind = "Release",
    plural = "releases",
    status = "ReleaseStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// What to install
    pub for_provider: ReleaseParameters,

    /// Provider credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<ProviderConfigReference>,

    /// Provider fields not managed by this operator
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Release status as reported by the provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    /// Provider-reported conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Release {
    /// The `Synced` condition, if reported
    pub fn synced(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, CONDITION_SYNCED))
    }

    /// The `Ready` condition, if reported
    pub fn ready(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, CONDITION_READY))
    }
}
