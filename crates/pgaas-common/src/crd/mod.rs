//! Custom Resource Definitions
//!
//! `PostgresqlStandalone` and `PostgresqlStandaloneOperatorConfig` are owned
//! by this operator. `Release` and `Schedule` belong to external controllers
//! and are typed here so they can be read and written like any other kind.

mod operator_config;
mod release;
mod schedule;
mod standalone;
mod types;

pub use operator_config::{
    BackupConfiguration, ChartSpec, HelmReleaseOverride, HelmReleaseTemplate, PersistenceSpec,
    PostgresqlStandaloneOperatorConfig, PostgresqlStandaloneOperatorConfigSpec, ResourceBounds,
};
pub use release::{ProviderConfigReference, Release, ReleaseParameters, ReleaseSpec, ReleaseStatus};
pub use schedule::{
    Backend, PruneJob, Retention, S3Backend, Schedule, ScheduleSpec, ScheduledJob,
    SecretKeySelector,
};
pub use standalone::{
    BackupSpec, ConnectionSecretRef, DeploymentStrategy, HelmChartStatus, MajorVersion, Parameters,
    PostgresqlStandalone, PostgresqlStandaloneSpec, PostgresqlStandaloneStatus, Resources,
};
pub use types::{
    find_condition, preserve_unknown_fields, remove_condition, set_condition, Condition,
    ConditionStatus, SecretRef, CONDITION_PROGRESSING, CONDITION_READY, CONDITION_SYNCED,
};
