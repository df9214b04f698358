//! Metrics registry for the class controllers
//!
//! OpenTelemetry instruments for reconcile throughput, latency and failure,
//! dropped work-queue keys and finalizer write conflicts. Exported through
//! the meter provider installed by [`crate::telemetry::init_telemetry`].

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for classguard metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("classguard"));

// ============================================================================
// Reconcile Metrics
// ============================================================================

/// Counter of reconciliations
///
/// Labels:
/// - `kind`: class kind
/// - `outcome`: deleted, invalid, ready, deletion_blocked, finalizer_removed,
///   not_owned, error
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("classguard_reconcile_total")
        .with_description("Total number of class reconciliations")
        .with_unit("{reconciles}")
        .build()
});

/// Histogram of reconcile duration
///
/// Labels:
/// - `kind`: class kind
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("classguard_reconcile_duration_seconds")
        .with_description("Duration of class reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `kind`: class kind
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("classguard_reconcile_errors_total")
        .with_description("Total number of class reconciliation errors")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Queue and Finalizer Metrics
// ============================================================================

/// Counter of keys dropped after exhausting retries or failing permanently
///
/// Labels:
/// - `kind`: class kind
pub static KEYS_DROPPED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("classguard_keys_dropped_total")
        .with_description("Total number of work queue keys dropped")
        .with_unit("{keys}")
        .build()
});

/// Counter of finalizer updates rejected with a write conflict
///
/// Labels:
/// - `kind`: class kind
pub static FINALIZER_CONFLICTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("classguard_finalizer_conflicts_total")
        .with_description("Total number of finalizer update conflicts")
        .with_unit("{conflicts}")
        .build()
});

/// Timer for one reconciliation
pub struct ReconcileTimer {
    kind: String,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation of a class of `kind`
    pub fn start(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion with the reconcile outcome
    pub fn success(self, outcome: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        RECONCILE_DURATION.record(
            duration,
            &[
                KeyValue::new("kind", self.kind.clone()),
                KeyValue::new("result", "success"),
            ],
        );
        RECONCILE_TOTAL.add(
            1,
            &[
                KeyValue::new("kind", self.kind),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }

    /// Record error completion
    pub fn error(self, error_type: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        RECONCILE_DURATION.record(
            duration,
            &[
                KeyValue::new("kind", self.kind.clone()),
                KeyValue::new("result", "error"),
            ],
        );
        RECONCILE_TOTAL.add(
            1,
            &[
                KeyValue::new("kind", self.kind.clone()),
                KeyValue::new("outcome", "error"),
            ],
        );
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("kind", self.kind),
                KeyValue::new("error_type", error_type.to_string()),
            ],
        );
    }
}

/// Record a work-queue key dropped for good
pub fn record_key_dropped(kind: &str) {
    KEYS_DROPPED.add(1, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record a finalizer update that hit a write conflict
pub fn record_finalizer_conflict(kind: &str) {
    FINALIZER_CONFLICTS.add(1, &[KeyValue::new("kind", kind.to_string())]);
}
