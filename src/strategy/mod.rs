//! Regime-driven execution engine
//!
//! Two long-running tasks share one [`RegimeStateStore`]:
//! - [`RefitScheduler`] refits the regime model on a wall-clock cadence and
//!   publishes each new estimate
//! - [`DecisionLoop`] polls the estimate, reconciles broker holdings and
//!   places the orders that bring them in line

pub mod conflict;
pub mod engine;
pub mod estimator;
pub mod executor;
pub mod reconciliation;
pub mod recorder;
pub mod refit;
pub mod regime_store;

pub use conflict::{ConflictReport, OrderConflictResolver};
pub use engine::{CycleOutcome, DecisionLoop, EngineConfig, EngineStatus};
pub use estimator::{MarkovSwitchingEstimator, RegimeEstimator, RegimeFit};
pub use executor::{size_entry, ActionOutcome, ExecutorConfig, OrderExecutor};
pub use reconciliation::{PositionReconciler, Reconciliation};
pub use recorder::{record_best_effort, PostgresRecorder, ProbabilityRecorder};
pub use refit::{
    last_completed_business_day, log_returns, next_refit_at, select_closed_bar, session_close,
    RefitConfig, RefitOutcome, RefitScheduler,
};
pub use regime_store::{PublishedSnapshot, RegimeStateStore};
