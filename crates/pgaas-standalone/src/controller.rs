//! PostgresqlStandalone controller
//!
//! [`reconcile`] picks a pipeline from the instance's finalizer and deletion
//! timestamp, seeds a fresh [`Context`] and runs it under a deadline. Errors
//! come back unchanged; [`error_policy`] decides how the platform retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use pgaas_common::crd::{PostgresqlStandalone, Release};
use pgaas_common::events::{EventPublisher, InstanceEvent, NoopEventPublisher};
use pgaas_common::metrics::ReconcileTimer;
use pgaas_common::store::{display_name, Store};
use pgaas_common::{
    Error, Result, DEFAULT_OPERATOR_NAMESPACE, FINALIZER, LABEL_INSTANCE, LABEL_INSTANCE_NAMESPACE,
    LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, REQUEUE_ERROR_SECS, REQUEUE_PROGRESSING_SECS,
    REQUEUE_SUCCESS_SECS,
};
use pgaas_pipeline::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, instrument, warn};

use crate::keys::{
    SharedRng, EVENTS, INSTANCE, INSTANCE_LABELS, NOW, OPERATOR_NAMESPACE, READY, RELEASE_GONE, RNG,
    STORE,
};
use crate::pipelines;

/// Default upper bound on one reconcile
pub const DEFAULT_DEADLINE_SECS: u64 = 120;

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Timing of reconciles
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Upper bound on one reconcile
    pub deadline: Duration,
    /// Requeue interval once the instance is Ready
    pub requeue_ready: Duration,
    /// Requeue interval while waiting for the release
    pub requeue_progressing: Duration,
    /// Requeue interval after a retryable error
    pub requeue_error: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            requeue_ready: Duration::from_secs(REQUEUE_SUCCESS_SECS),
            requeue_progressing: Duration::from_secs(REQUEUE_PROGRESSING_SECS),
            requeue_error: Duration::from_secs(REQUEUE_ERROR_SECS),
        }
    }
}

/// Shared state of the controller, handed to every reconcile
///
/// Use [`ControllerContext::builder`] to construct instances:
///
/// ```text
/// let ctx = ControllerContext::builder(Store::kube(client))
///     .events(Arc::new(KubeEventPublisher::new(client, "pgaas-operator")))
///     .operator_namespace("pgaas-system")
///     .build();
/// ```
pub struct ControllerContext {
    /// Cluster store
    pub store: Store,
    /// Kubernetes event sink
    pub events: Arc<dyn EventPublisher>,
    /// Generator for namespace names and passwords
    pub rng: SharedRng,
    /// Namespace holding the operator configs
    pub operator_namespace: String,
    /// Deadline and requeue intervals
    pub settings: ReconcileSettings,
    clock: Clock,
}

impl ControllerContext {
    /// Create a builder for constructing a ControllerContext
    pub fn builder(store: Store) -> ControllerContextBuilder {
        ControllerContextBuilder::new(store)
    }

    /// Current time according to the context's clock
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

/// Builder for [`ControllerContext`]
pub struct ControllerContextBuilder {
    store: Store,
    events: Option<Arc<dyn EventPublisher>>,
    rng: Option<StdRng>,
    operator_namespace: Option<String>,
    settings: ReconcileSettings,
    clock: Option<Clock>,
}

impl ControllerContextBuilder {
    fn new(store: Store) -> Self {
        Self {
            store,
            events: None,
            rng: None,
            operator_namespace: None,
            settings: ReconcileSettings::default(),
            clock: None,
        }
    }

    /// Set the event sink (defaults to dropping events)
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Seed the generator for reproducible names and passwords
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Set the namespace holding the operator configs
    pub fn operator_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.operator_namespace = Some(namespace.into());
        self
    }

    /// Set deadline and requeue intervals
    pub fn settings(mut self, settings: ReconcileSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the clock (primarily for testing)
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the ControllerContext
    pub fn build(self) -> ControllerContext {
        ControllerContext {
            store: self.store,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            rng: Arc::new(Mutex::new(self.rng.unwrap_or_else(StdRng::from_entropy))),
            operator_namespace: self
                .operator_namespace
                .unwrap_or_else(|| DEFAULT_OPERATOR_NAMESPACE.to_string()),
            settings: self.settings,
            clock: self.clock.unwrap_or_else(|| Arc::new(Utc::now)),
        }
    }
}

/// Which pipeline a reconcile runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not yet provisioned
    Create,
    /// Provisioned, converge and check readiness
    Update,
    /// Being deleted with the finalizer still present
    Delete,
    /// Being deleted and already released
    Finalized,
}

/// Select the pipeline for an instance
pub fn select_phase(instance: &PostgresqlStandalone) -> Phase {
    let has_finalizer = instance.finalizers().iter().any(|f| f == FINALIZER);
    if instance.metadata.deletion_timestamp.is_some() {
        return if has_finalizer {
            Phase::Delete
        } else {
            Phase::Finalized
        };
    }
    if has_finalizer && instance.deployment_namespace().is_some() {
        Phase::Update
    } else {
        Phase::Create
    }
}

/// Labels linking a dependent resource to its instance
pub fn instance_labels(instance: &PostgresqlStandalone) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_INSTANCE.to_string(), instance.name_any()),
        (
            LABEL_INSTANCE_NAMESPACE.to_string(),
            instance.namespace().unwrap_or_default(),
        ),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_VALUE.to_string(),
        ),
    ])
}

/// Fresh pipeline context for one reconcile of `instance`
pub fn seed_context(instance: &PostgresqlStandalone, ctx: &ControllerContext) -> Context {
    let mut run = Context::new();
    run.set(STORE, ctx.store.clone());
    run.set(INSTANCE, instance.clone());
    run.set(OPERATOR_NAMESPACE, ctx.operator_namespace.clone());
    run.set(INSTANCE_LABELS, instance_labels(instance));
    run.set(RNG, ctx.rng.clone());
    run.set(NOW, ctx.now());
    run.set(EVENTS, ctx.events.clone());
    run
}

/// Reconcile a PostgresqlStandalone
#[instrument(skip(instance, ctx), fields(instance = %display_name(instance.as_ref())))]
pub async fn reconcile(
    instance: Arc<PostgresqlStandalone>,
    ctx: Arc<ControllerContext>,
) -> Result<Action> {
    let phase = select_phase(&instance);
    let pipeline = match phase {
        Phase::Create => pipelines::create(),
        Phase::Update => pipelines::update(),
        Phase::Delete => pipelines::delete(),
        Phase::Finalized => {
            debug!("finalizer already removed, nothing to do");
            return Ok(Action::await_change());
        }
    };
    info!(phase = ?phase, "reconciling instance");

    let timer = ReconcileTimer::start(display_name(instance.as_ref()));
    let mut run = seed_context(&instance, &ctx);
    let deadline = ctx.settings.deadline;
    let outcome = match tokio::time::timeout(deadline, pipeline.run(&mut run)).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeadlineExceeded {
            seconds: deadline.as_secs(),
        }),
    };
    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            timer.error(e.kind_label());
            return Err(e);
        }
    };
    timer.success();
    debug!(
        executed = report.executed.len(),
        skipped = report.skipped.len(),
        "pipeline finished"
    );

    if phase == Phase::Delete {
        if run.try_get(RELEASE_GONE) == Some(&true) {
            info!("teardown complete");
            ctx.events
                .publish(&instance.object_ref(&()), InstanceEvent::Deleted)
                .await;
            return Ok(Action::await_change());
        }
        debug!("waiting for the release to be removed");
        return Ok(Action::requeue(ctx.settings.requeue_progressing));
    }

    if run.try_get(READY) == Some(&true) {
        Ok(Action::requeue(ctx.settings.requeue_ready))
    } else {
        Ok(Action::requeue(ctx.settings.requeue_progressing))
    }
}

/// Decide how a failed reconcile is retried
///
/// - Missing context keys are defects: logged at error level, reported as a
///   Warning event, not requeued.
/// - Validation and serialization errors need a spec or config change.
/// - Everything else is transient and requeued after the error interval.
pub fn error_policy(
    instance: Arc<PostgresqlStandalone>,
    error: &Error,
    ctx: Arc<ControllerContext>,
) -> Action {
    let name = display_name(instance.as_ref());
    if error.is_precondition_violation() {
        error!(instance = %name, error = %error, "internal defect, reconcile halted");
        publish_warning(&instance, &ctx, InstanceEvent::InternalError(error.to_string()));
        return Action::await_change();
    }
    match error {
        Error::Validation { .. } | Error::Serialization { .. } => {
            warn!(instance = %name, error = %error, "reconcile rejected, waiting for a change");
            publish_warning(&instance, &ctx, InstanceEvent::ValidationFailed(error.to_string()));
            Action::await_change()
        }
        _ => {
            warn!(
                instance = %name,
                error = %error,
                retry_in = ?ctx.settings.requeue_error,
                "reconcile failed, requeueing"
            );
            Action::requeue(ctx.settings.requeue_error)
        }
    }
}

fn publish_warning(instance: &PostgresqlStandalone, ctx: &ControllerContext, event: InstanceEvent) {
    let events = ctx.events.clone();
    let reference = instance.object_ref(&());
    tokio::spawn(async move {
        events.publish(&reference, event).await;
    });
}

/// Map a Helm release back to the instance it belongs to
pub fn release_to_instance(release: Release) -> Option<ObjectRef<PostgresqlStandalone>> {
    let labels = release.labels();
    let name = labels.get(LABEL_INSTANCE)?;
    let namespace = labels.get(LABEL_INSTANCE_NAMESPACE)?;
    Some(ObjectRef::new(name).within(namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Harness};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use k8s_openapi::api::core::v1::{Namespace, Secret};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::{ApiResource, DynamicObject};
    use pgaas_common::crd::{find_condition, Schedule, CONDITION_PROGRESSING};
    use pgaas_common::events::reasons;
    use pgaas_common::store::{ObjectKey, ObjectStore};
    use pgaas_common::testing::{MemoryStore, Operation};
    use rstest::rstest;

    fn with_meta(
        finalizer: bool,
        deleting: bool,
        namespace: Option<&str>,
    ) -> PostgresqlStandalone {
        let mut instance = fixtures::instance();
        if finalizer {
            instance.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        }
        if deleting {
            instance.metadata.deletion_timestamp =
                Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(fixtures::now()));
        }
        if let Some(ns) = namespace {
            instance.status = Some(pgaas_common::crd::PostgresqlStandaloneStatus {
                helm_chart: Some(pgaas_common::crd::HelmChartStatus {
                    deployment_namespace: ns.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        instance
    }

    #[rstest]
    #[case(false, false, None, Phase::Create)]
    #[case(true, false, None, Phase::Create)]
    #[case(false, false, Some("sv-postgresql-s-abc"), Phase::Create)]
    #[case(true, false, Some("sv-postgresql-s-abc"), Phase::Update)]
    #[case(true, true, Some("sv-postgresql-s-abc"), Phase::Delete)]
    #[case(true, true, None, Phase::Delete)]
    #[case(false, true, Some("sv-postgresql-s-abc"), Phase::Finalized)]
    fn phase_selection(
        #[case] finalizer: bool,
        #[case] deleting: bool,
        #[case] namespace: Option<&str>,
        #[case] expected: Phase,
    ) {
        assert_eq!(select_phase(&with_meta(finalizer, deleting, namespace)), expected);
    }

    #[test]
    fn releases_map_back_to_their_instance() {
        let mut release = Release::new("sv-postgresql-s-abc", Default::default());
        release.metadata.labels = Some(instance_labels(&fixtures::instance()));

        let reference = release_to_instance(release).unwrap();
        assert_eq!(reference.name, "orders");
        assert_eq!(reference.namespace.as_deref(), Some("team-a"));

        let unlabelled = Release::new("other", Default::default());
        assert!(release_to_instance(unlabelled).is_none());
    }

    async fn run(harness: &Harness) -> Result<Action> {
        reconcile(Arc::new(harness.instance()), harness.controller_context()).await
    }

    /// Story: an instance is provisioned, becomes ready and is torn down in
    /// two passes
    #[tokio::test]
    async fn story_full_lifecycle() {
        let harness = Harness::new();
        harness.seed_bucket_secret();
        let ns = harness.deployment_namespace();

        // First reconcile provisions everything and waits for the release
        let action = run(&harness).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_PROGRESSING_SECS)));
        let instance = harness.instance();
        assert_eq!(instance.finalizers(), &[FINALIZER.to_string()]);
        assert_eq!(instance.deployment_namespace(), Some(ns.as_str()));
        assert!(harness.memory.contains::<Namespace>(&ObjectKey::cluster(&ns)));
        assert!(harness.memory.contains::<Release>(&ObjectKey::cluster(&ns)));
        assert!(harness.memory.contains::<Schedule>(&ObjectKey::namespaced(&ns, "postgresql")));
        let connection = ObjectKey::namespaced("team-a", "orders-connection");
        assert!(harness.memory.contains::<Secret>(&connection));
        let status = instance.status.unwrap();
        assert!(find_condition(&status.conditions, CONDITION_PROGRESSING).unwrap().is_true());
        assert!(!status.is_ready());
        assert!(harness.events.reasons().contains(&reasons::PROGRESSING.to_string()));

        // The provider reports the release ready
        harness.mark_release_ready(fixtures::now());
        let action = run(&harness).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)));
        assert!(harness.instance().status.unwrap().is_ready());
        assert!(harness.events.reasons().contains(&reasons::READY.to_string()));

        // Deletion: the first pass removes the release but keeps the namespace
        let store = harness.store.clone();
        assert!(store
            .delete::<PostgresqlStandalone>(&ObjectKey::namespaced("team-a", "orders"))
            .await
            .unwrap());
        let action = run(&harness).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_PROGRESSING_SECS)));
        assert!(!harness.memory.contains::<Secret>(&connection));
        assert!(!harness.memory.contains::<Release>(&ObjectKey::cluster(&ns)));
        assert!(harness.memory.contains::<Namespace>(&ObjectKey::cluster(&ns)));
        assert_eq!(harness.instance().finalizers(), &[FINALIZER.to_string()]);

        // The second pass finds the release gone and finishes
        let action = run(&harness).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(!harness.memory.contains::<Namespace>(&ObjectKey::cluster(&ns)));
        assert!(!harness
            .memory
            .contains::<PostgresqlStandalone>(&ObjectKey::namespaced("team-a", "orders")));
        assert!(harness.events.reasons().contains(&reasons::DELETED.to_string()));
    }

    /// Story: a values change is not ready until the release re-reports
    #[tokio::test]
    async fn story_spec_change_waits_for_fresh_ready() {
        let harness = Harness::ready().await;

        let mut instance = harness.instance();
        instance.spec.parameters.resources.memory_limit = Some(Quantity("4Gi".to_string()));
        harness.store.update(&instance).await.unwrap();
        harness.advance(ChronoDuration::minutes(10));

        // The release still carries its old Ready report
        let action = run(&harness).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_PROGRESSING_SECS)));
        let status = harness.instance().status.unwrap();
        assert!(!status.is_ready());
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(
            status.helm_chart.unwrap().modified_time,
            Some(fixtures::now() + ChronoDuration::minutes(10))
        );

        harness.mark_release_ready(fixtures::now() + ChronoDuration::minutes(11));
        let action = run(&harness).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)));
        assert!(harness.instance().status.unwrap().is_ready());
    }

    #[tokio::test]
    async fn conflicts_are_surfaced_and_requeued() {
        let harness = Harness::ready().await;
        harness.memory.fail_next(Operation::UpdateStatus, "PostgresqlStandalone");
        let mut instance = harness.instance();
        instance.spec.parameters.resources.memory_limit = Some(Quantity("4Gi".to_string()));
        harness.store.update(&instance).await.unwrap();

        let err = run(&harness).await.unwrap_err();
        assert!(err.is_conflict());
        let action = error_policy(Arc::new(harness.instance()), &err, harness.controller_context());
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS)));
    }

    #[tokio::test]
    async fn missing_operator_config_is_retried() {
        let harness = Harness::empty();
        harness.memory.seed(&fixtures::instance());

        let err = run(&harness).await.unwrap_err();
        assert!(matches!(err, Error::OperatorConfigLookup { found: 0, .. }));
        let action = error_policy(Arc::new(harness.instance()), &err, harness.controller_context());
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS)));
    }

    #[tokio::test]
    async fn validation_errors_wait_for_a_change() {
        let harness = Harness::new();
        let action = error_policy(
            Arc::new(harness.instance()),
            &Error::validation_for("orders", "too small"),
            harness.controller_context(),
        );
        assert_eq!(action, Action::await_change());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.events.warnings(), vec![reasons::VALIDATION_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn missing_context_key_halts_loudly() {
        let harness = Harness::new();
        let action = error_policy(
            Arc::new(harness.instance()),
            &Error::missing_context_key("release"),
            harness.controller_context(),
        );
        assert_eq!(action, Action::await_change());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.events.warnings(), vec![reasons::INTERNAL_ERROR.to_string()]);
    }

    /// Store whose list calls never finish in time
    struct StalledStore(MemoryStore);

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
            self.0.get(ar, key).await
        }

        async fn list(
            &self,
            ar: &ApiResource,
            namespace: Option<String>,
            label_selector: Option<String>,
        ) -> Result<Vec<DynamicObject>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.0.list(ar, namespace, label_selector).await
        }

        async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
            self.0.create(ar, obj).await
        }

        async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
            self.0.update(ar, obj).await
        }

        async fn update_status(
            &self,
            ar: &ApiResource,
            obj: &DynamicObject,
        ) -> Result<DynamicObject> {
            self.0.update_status(ar, obj).await
        }

        async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<bool> {
            self.0.delete(ar, key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_reconcile() {
        let memory = MemoryStore::new();
        let instance = memory.seed(&fixtures::instance());
        let ctx = ControllerContext::builder(Store::new(Arc::new(StalledStore(memory))))
            .seed(fixtures::SEED)
            .settings(ReconcileSettings {
                deadline: Duration::from_secs(5),
                ..Default::default()
            })
            .build();

        let err = reconcile(Arc::new(instance), Arc::new(ctx)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { seconds: 5 }));
        assert!(err.is_retryable());
    }
}
