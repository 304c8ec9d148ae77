//! Shared test fixtures: a seeded in-memory cluster and canned resources

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::runtime::events::EventType;
use parking_lot::Mutex;
use pgaas_common::crd::{
    BackupConfiguration, BackupSpec, ChartSpec, Condition, ConditionStatus, ConnectionSecretRef,
    HelmChartStatus, HelmReleaseTemplate, MajorVersion, Parameters, PersistenceSpec,
    PostgresqlStandalone, PostgresqlStandaloneOperatorConfig,
    PostgresqlStandaloneOperatorConfigSpec, PostgresqlStandaloneSpec, PostgresqlStandaloneStatus,
    Release, ReleaseStatus, ResourceBounds, Resources, SecretRef, CONDITION_READY,
    CONDITION_SYNCED,
};
use pgaas_common::events::{EventPublisher, InstanceEvent};
use pgaas_common::store::{ObjectKey, Store};
use pgaas_common::testing::MemoryStore;
use pgaas_common::{DEFAULT_OPERATOR_NAMESPACE, FINALIZER, MAJOR_VERSION_LABEL};
use pgaas_pipeline::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use crate::config::fetch_operator_config;
use crate::controller::{seed_context, ControllerContext};
use crate::naming::deployment_namespace_name;

pub const SEED: u64 = 42;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn quantity(s: &str) -> Option<Quantity> {
    Some(Quantity(s.to_string()))
}

/// First namespace name a generator seeded with [`SEED`] draws
pub fn predicted_namespace() -> String {
    deployment_namespace_name(&mut StdRng::seed_from_u64(SEED))
}

pub fn instance() -> PostgresqlStandalone {
    let mut instance = PostgresqlStandalone::new(
        "orders",
        PostgresqlStandaloneSpec {
            parameters: Parameters {
                major_version: MajorVersion::V15,
                resources: Resources {
                    memory_limit: quantity("2Gi"),
                    storage_capacity: quantity("10Gi"),
                },
                enable_super_user: false,
            },
            backup: BackupSpec { enabled: true },
            write_connection_secret_to_ref: ConnectionSecretRef {
                name: "orders-connection".to_string(),
            },
        },
    );
    instance.metadata.namespace = Some("team-a".to_string());
    instance
}

pub fn operator_config(version: MajorVersion) -> PostgresqlStandaloneOperatorConfig {
    let mut config = PostgresqlStandaloneOperatorConfig::new(
        &format!("postgresql-{version}"),
        PostgresqlStandaloneOperatorConfigSpec {
            resource_minima: ResourceBounds {
                memory_limit: quantity("1Gi"),
                storage_capacity: quantity("5Gi"),
            },
            resource_maxima: ResourceBounds {
                memory_limit: quantity("8Gi"),
                storage_capacity: quantity("100Gi"),
            },
            helm_release_template: HelmReleaseTemplate {
                chart: ChartSpec {
                    repository: "https://charts.bitnami.com/bitnami".to_string(),
                    name: "postgresql".to_string(),
                    version: "12.1.6".to_string(),
                },
                values: json!({"image": {"registry": "docker.io", "tag": "15.3.0"}})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
            helm_releases: Vec::new(),
            helm_provider_config_reference: "helm-provider".to_string(),
            persistence: PersistenceSpec {
                storage_class_name: Some("ssd".to_string()),
                access_modes: Vec::new(),
            },
            backup_configuration: BackupConfiguration {
                s3_bucket_secret: SecretRef {
                    name: "bucket-credentials".to_string(),
                },
            },
        },
    );
    config.metadata.namespace = Some(DEFAULT_OPERATOR_NAMESPACE.to_string());
    config.metadata.labels = Some(BTreeMap::from([(
        MAJOR_VERSION_LABEL.to_string(),
        version.to_string(),
    )]));
    config
}

/// Event sink remembering what was published
#[derive(Default)]
pub struct RecordingEvents {
    published: Mutex<Vec<(EventType, String)>>,
}

impl RecordingEvents {
    /// Reasons of every published event, oldest first
    pub fn reasons(&self) -> Vec<String> {
        self.published.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Reasons of the published Warning events
    pub fn warnings(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| *t == EventType::Warning)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(&self, _instance_ref: &ObjectReference, event: InstanceEvent) {
        self.published
            .lock()
            .push((event.type_(), event.reason().to_string()));
    }
}

/// In-memory cluster holding the operator config and one instance
pub struct Harness {
    pub memory: Arc<MemoryStore>,
    pub store: Store,
    pub events: Arc<RecordingEvents>,
    clock: Arc<Mutex<DateTime<Utc>>>,
}

impl Harness {
    /// Empty cluster
    pub fn empty() -> Self {
        let memory = Arc::new(MemoryStore::new());
        Self {
            store: Store::new(memory.clone()),
            memory,
            events: Arc::new(RecordingEvents::default()),
            clock: Arc::new(Mutex::new(now())),
        }
    }

    /// Operator config for v15 and a fresh instance
    pub fn new() -> Self {
        let harness = Self::empty();
        harness.memory.seed(&operator_config(MajorVersion::V15));
        harness.memory.seed(&instance());
        harness
    }

    /// Instance with finalizer and deployment namespace already assigned
    pub fn provisioned() -> Self {
        let harness = Self::empty();
        harness.memory.seed(&operator_config(MajorVersion::V15));
        let mut provisioned = instance();
        provisioned.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        provisioned.status = Some(PostgresqlStandaloneStatus {
            helm_chart: Some(HelmChartStatus {
                deployment_namespace: predicted_namespace(),
                ..Default::default()
            }),
            ..Default::default()
        });
        harness.memory.seed(&provisioned);
        harness
    }

    /// Instance reconciled to Ready, with the operation log cleared
    pub async fn ready() -> Self {
        let harness = Self::new();
        harness.seed_bucket_secret();
        let ctx = harness.controller_context();
        crate::reconcile(Arc::new(harness.instance()), ctx.clone())
            .await
            .unwrap();
        harness.mark_release_ready(harness.now());
        crate::reconcile(Arc::new(harness.instance()), ctx).await.unwrap();
        assert!(harness.instance().status.unwrap().is_ready());
        harness.memory.clear_operations();
        harness
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.clock.lock()
    }

    /// Move the controller clock forward
    pub fn advance(&self, by: Duration) {
        *self.clock.lock() += by;
    }

    pub fn instance(&self) -> PostgresqlStandalone {
        self.memory
            .object(&ObjectKey::namespaced("team-a", "orders"))
            .expect("instance is stored")
    }

    /// Assigned deployment namespace, or the one the next assignment draws
    pub fn deployment_namespace(&self) -> String {
        self.memory
            .object::<PostgresqlStandalone>(&ObjectKey::namespaced("team-a", "orders"))
            .and_then(|i| i.deployment_namespace().map(str::to_string))
            .unwrap_or_else(predicted_namespace)
    }

    /// Controller context over this cluster with a freshly seeded generator
    pub fn controller_context(&self) -> Arc<ControllerContext> {
        let clock = self.clock.clone();
        Arc::new(
            ControllerContext::builder(self.store.clone())
                .events(self.events.clone())
                .seed(SEED)
                .clock(Arc::new(move || *clock.lock()))
                .build(),
        )
    }

    /// Pipeline context as the controller would seed it
    pub fn context(&self) -> Context {
        seed_context(&self.instance(), &self.controller_context())
    }

    /// [`Harness::context`] with the operator config already fetched
    pub async fn configured_context(&self) -> Context {
        let mut ctx = self.context();
        fetch_operator_config(&mut ctx).await.unwrap();
        ctx
    }

    /// Bucket secret the platform provisions into the deployment namespace
    pub fn seed_bucket_secret(&self) {
        let data = [
            ("endpoint", "https://objects.example.com"),
            ("bucket", "orders-backups"),
            ("AWS_ACCESS_KEY_ID", "access"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ];
        self.memory.seed(&Secret {
            metadata: ObjectMeta {
                name: Some("bucket-credentials".to_string()),
                namespace: Some(self.deployment_namespace()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        });
    }

    /// Report the release Synced and Ready as of `at`
    pub fn mark_release_ready(&self, at: DateTime<Utc>) {
        let mut release: Release = self
            .memory
            .object(&ObjectKey::cluster(self.deployment_namespace()))
            .expect("release is stored");
        release.status = Some(ReleaseStatus {
            conditions: vec![
                Condition::new(CONDITION_SYNCED, ConditionStatus::True, "ReconcileSuccess", "", at),
                Condition::new(CONDITION_READY, ConditionStatus::True, "Available", "", at),
            ],
        });
        self.memory.seed(&release);
    }
}
