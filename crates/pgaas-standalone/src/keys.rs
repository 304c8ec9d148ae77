//! Context keys shared by the instance pipelines
//!
//! The controller seeds [`STORE`], [`INSTANCE`], [`OPERATOR_NAMESPACE`],
//! [`INSTANCE_LABELS`], [`RNG`], [`NOW`] and [`EVENTS`]. Everything else is
//! produced by a step and consumed by a later one.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use parking_lot::Mutex;
use pgaas_common::crd::{PostgresqlStandalone, PostgresqlStandaloneOperatorConfig, Release};
use pgaas_common::events::EventPublisher;
use pgaas_common::store::Store;
use pgaas_pipeline::Key;
use rand::rngs::StdRng;

/// Random generator shared by the steps of one reconcile
pub type SharedRng = Arc<Mutex<StdRng>>;

/// Cluster store
pub const STORE: Key<Store> = Key::new("store");

/// The instance being reconciled; replaced after every write to it
pub const INSTANCE: Key<PostgresqlStandalone> = Key::new("instance");

/// Namespace holding the operator configs
pub const OPERATOR_NAMESPACE: Key<String> = Key::new("operator-namespace");

/// Labels put on every dependent resource
pub const INSTANCE_LABELS: Key<BTreeMap<String, String>> = Key::new("instance-labels");

/// Generator for namespace suffixes and passwords
pub const RNG: Key<SharedRng> = Key::new("rng");

/// Wall-clock time of this reconcile
pub const NOW: Key<DateTime<Utc>> = Key::new("now");

/// Kubernetes event sink
pub const EVENTS: Key<Arc<dyn EventPublisher>> = Key::new("events");

/// Operator config matching the instance's major version
pub const OPERATOR_CONFIG: Key<PostgresqlStandaloneOperatorConfig> = Key::new("operator-config");

/// Credentials secret in the deployment namespace
pub const CREDENTIALS: Key<Secret> = Key::new("credentials");

/// Helm release as last written
pub const RELEASE: Key<Release> = Key::new("release");

/// S3 bucket secret in the deployment namespace
pub const BUCKET_SECRET: Key<Secret> = Key::new("bucket-secret");

/// Whether the Helm release is confirmed absent during teardown
pub const RELEASE_GONE: Key<bool> = Key::new("release-gone");

/// Whether the instance was found ready by this reconcile
pub const READY: Key<bool> = Key::new("ready");
