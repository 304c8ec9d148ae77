//! OpenTelemetry metrics for instance reconciliation
//!
//! Instruments are created lazily on the global meter; without an OTLP
//! exporter they record into a no-op provider.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

static METER: Lazy<Meter> = Lazy::new(|| global::meter("pgaas"));

/// Histogram of reconcile duration
///
/// Labels:
/// - `instance`: namespace/name of the PostgresqlStandalone
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("pgaas_reconcile_duration_seconds")
        .with_description("Duration of instance reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `instance`: namespace/name of the PostgresqlStandalone
/// - `error_type`: low-cardinality error kind
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("pgaas_reconcile_errors_total")
        .with_description("Total number of instance reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of executed pipeline steps
///
/// Labels:
/// - `step`: step path, e.g. `create/converge/ensure-release`
/// - `outcome`: ok, error
pub static PIPELINE_STEPS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("pgaas_pipeline_steps_total")
        .with_description("Total number of executed pipeline steps")
        .with_unit("{steps}")
        .build()
});

/// Outcome label of a pipeline step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step succeeded
    Ok,
    /// Step returned an error
    Error,
}

impl StepOutcome {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Record one executed pipeline step
pub fn record_step(step: &str, outcome: StepOutcome) {
    PIPELINE_STEPS.add(
        1,
        &[
            KeyValue::new("step", step.to_string()),
            KeyValue::new("outcome", outcome.as_str()),
        ],
    );
}

/// Times one reconcile and records it on completion
pub struct ReconcileTimer {
    instance: String,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconcile of `instance`
    pub fn start(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("instance", self.instance),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record a failed reconcile
    pub fn error(self, error_type: &'static str) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("instance", self.instance.clone()),
                KeyValue::new("result", "error"),
            ],
        );
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("instance", self.instance),
                KeyValue::new("error_type", error_type),
            ],
        );
    }
}
