//! Kubernetes Events emitted about PostgresqlStandalone instances.
//!
//! Each lifecycle moment the operator reports is an [`InstanceEvent`]; the
//! variant fixes its type, reason and action so call sites cannot mix them
//! up. Publishing is fire-and-forget: a failed publish is logged and never
//! fails the reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use tracing::{debug, warn};

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Dependent resources are being converged
    pub const PROGRESSING: &str = "Progressing";
    /// The database is ready
    pub const READY: &str = "Ready";
    /// Dependent resources were torn down
    pub const DELETED: &str = "Deleted";
    /// Spec or operator config failed validation
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// The operator hit an internal defect
    pub const INTERNAL_ERROR: &str = "InternalError";
}

const ACTION_RECONCILE: &str = "Reconcile";
const ACTION_DELETE: &str = "Delete";

/// Something worth telling the instance owner about
#[derive(Clone, Debug, PartialEq)]
pub enum InstanceEvent {
    /// A new generation started converging
    Progressing {
        /// Generation being converged
        generation: i64,
    },
    /// The Helm release caught up with the desired values
    Ready,
    /// Teardown finished and the finalizer was released
    Deleted,
    /// The instance or its operator config was rejected
    ValidationFailed(String),
    /// A step ran without its prerequisites; needs a fix in the operator
    InternalError(String),
}

impl InstanceEvent {
    /// Normal or Warning
    pub fn type_(&self) -> EventType {
        match self {
            Self::ValidationFailed(_) | Self::InternalError(_) => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Progressing { .. } => reasons::PROGRESSING,
            Self::Ready => reasons::READY,
            Self::Deleted => reasons::DELETED,
            Self::ValidationFailed(_) => reasons::VALIDATION_FAILED,
            Self::InternalError(_) => reasons::INTERNAL_ERROR,
        }
    }

    /// Operator action the event belongs to
    pub fn action(&self) -> &'static str {
        match self {
            Self::Deleted => ACTION_DELETE,
            _ => ACTION_RECONCILE,
        }
    }

    /// Human-readable note
    pub fn note(&self) -> String {
        match self {
            Self::Progressing { generation } => format!("Converging generation {generation}"),
            Self::Ready => "PostgreSQL is ready".to_string(),
            Self::Deleted => "Release, namespace and connection secret removed".to_string(),
            Self::ValidationFailed(msg) | Self::InternalError(msg) => msg.clone(),
        }
    }

    fn into_kube_event(self) -> Event {
        Event {
            type_: self.type_(),
            reason: self.reason().to_string(),
            note: Some(self.note()),
            action: self.action().to_string(),
            secondary: None,
        }
    }
}

/// Publishes events about an instance
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` on the instance behind `instance_ref`
    async fn publish(&self, instance_ref: &ObjectReference, event: InstanceEvent);
}

/// Publisher backed by the Kubernetes events API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, instance_ref: &ObjectReference, event: InstanceEvent) {
        let reason = event.reason();
        let instance = instance_ref.name.as_deref().unwrap_or_default();
        match self.recorder.publish(&event.into_kube_event(), instance_ref).await {
            Ok(()) => debug!(instance, reason, "event published"),
            Err(e) => warn!(instance, reason, error = %e, "failed to publish event"),
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _instance_ref: &ObjectReference, _event: InstanceEvent) {}
}
