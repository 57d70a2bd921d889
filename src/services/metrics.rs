use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Process-wide counters for the engine
#[derive(Debug, Default)]
pub struct Metrics {
    /// Decision cycles started
    pub decision_cycles: AtomicU64,
    /// Decision cycles abandoned on an error
    pub cycle_errors: AtomicU64,
    /// Refits that published a snapshot
    pub refits_ok: AtomicU64,
    /// Refits aborted before publishing
    pub refits_failed: AtomicU64,
    /// Market orders accepted by the broker
    pub orders_submitted: AtomicU64,
    /// Conflicting orders cancelled
    pub orders_cancelled: AtomicU64,
    /// Probability samples that failed to persist
    pub recorder_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub decision_cycles: u64,
    pub cycle_errors: u64,
    pub refits_ok: u64,
    pub refits_failed: u64,
    pub orders_submitted: u64,
    pub orders_cancelled: u64,
    pub recorder_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_decision_cycles(&self) {
        self.decision_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cycle_errors(&self) {
        self.cycle_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refits_ok(&self) {
        self.refits_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refits_failed(&self) {
        self.refits_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_submitted(&self) {
        self.orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_orders_cancelled(&self, count: u64) {
        self.orders_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_recorder_failures(&self) {
        self.recorder_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decision_cycles: self.decision_cycles.load(Ordering::Relaxed),
            cycle_errors: self.cycle_errors.load(Ordering::Relaxed),
            refits_ok: self.refits_ok.load(Ordering::Relaxed),
            refits_failed: self.refits_failed.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            recorder_failures: self.recorder_failures.load(Ordering::Relaxed),
        }
    }

    /// Export counters in Prometheus text format
    pub fn prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP switcher_decision_cycles_total Decision cycles started
# TYPE switcher_decision_cycles_total counter
switcher_decision_cycles_total {}

# HELP switcher_cycle_errors_total Decision cycles abandoned on error
# TYPE switcher_cycle_errors_total counter
switcher_cycle_errors_total {}

# HELP switcher_refits_total Regime refits by outcome
# TYPE switcher_refits_total counter
switcher_refits_total{{outcome="ok"}} {}
switcher_refits_total{{outcome="failed"}} {}

# HELP switcher_orders_submitted_total Market orders submitted
# TYPE switcher_orders_submitted_total counter
switcher_orders_submitted_total {}

# HELP switcher_orders_cancelled_total Conflicting orders cancelled
# TYPE switcher_orders_cancelled_total counter
switcher_orders_cancelled_total {}

# HELP switcher_recorder_failures_total Probability samples not persisted
# TYPE switcher_recorder_failures_total counter
switcher_recorder_failures_total {}
"#,
            s.decision_cycles,
            s.cycle_errors,
            s.refits_ok,
            s.refits_failed,
            s.orders_submitted,
            s.orders_cancelled,
            s.recorder_failures,
        )
    }

    /// Log a one-line status summary
    pub fn log_status(&self) {
        let s = self.snapshot();
        info!(
            "Cycles: {} ({} errors) | Refits: {} ok / {} failed | Orders: {} submitted, {} cancelled | Recorder failures: {}",
            s.decision_cycles,
            s.cycle_errors,
            s.refits_ok,
            s.refits_failed,
            s.orders_submitted,
            s.orders_cancelled,
            s.recorder_failures,
        );
    }
}
