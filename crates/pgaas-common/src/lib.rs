//! Common types for the standalone PostgreSQL operator: CRDs, errors, the
//! cluster store abstraction and the configuration-tree merge.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod metrics;
pub mod quantity;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod values;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the resources owned by this operator
pub const API_GROUP: &str = "postgresql.pgaas.dev";

/// Finalizer guarding teardown of a PostgresqlStandalone's dependent resources
pub const FINALIZER: &str = "postgresql.pgaas.dev/finalizer";

/// Label selecting the operator config for a major version
pub const MAJOR_VERSION_LABEL: &str = "postgresql.pgaas.dev/major-version";

/// Label carrying the owning instance name on dependent resources
pub const LABEL_INSTANCE: &str = "postgresql.pgaas.dev/instance";

/// Label carrying the owning instance namespace on dependent resources
pub const LABEL_INSTANCE_NAMESPACE: &str = "postgresql.pgaas.dev/instance-namespace";

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Managed-by label value for resources created by this operator
pub const LABEL_MANAGED_BY_VALUE: &str = "pgaas-operator";

/// Default namespace the operator runs in and reads its configs from
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "pgaas-system";

/// Requeue interval once an instance is Ready
pub const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue interval while waiting for the release to become ready
pub const REQUEUE_PROGRESSING_SECS: u64 = 15;

/// Requeue interval after a failed reconcile
pub const REQUEUE_ERROR_SECS: u64 = 30;
