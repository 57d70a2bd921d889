//! Decision loop
//!
//! Polls the published regime snapshot, reconciles it against the broker's
//! real holdings and issues the Exit/Entry pair needed to line them up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::domain::{HeldPosition, InstrumentPair, RegimeSnapshot};
use crate::error::Result;
use crate::services::Metrics;
use crate::strategy::executor::{ActionOutcome, OrderExecutor};
use crate::strategy::reconciliation::PositionReconciler;
use crate::strategy::recorder::{record_best_effort, ProbabilityRecorder};
use crate::strategy::regime_store::RegimeStateStore;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    /// Upper bound on one recorder write
    pub record_timeout: Duration,
}

impl EngineConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.schedule.poll_interval_ms),
            record_timeout: Duration::from_millis(config.schedule.call_timeout_ms),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            record_timeout: Duration::from_secs(15),
        }
    }
}

/// Last observed engine state, exposed on `/status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_snapshot: Option<RegimeSnapshot>,
    pub last_held: Option<HeldPosition>,
    pub last_desired: Option<HeldPosition>,
    /// Symbol the engine last entered; cleared on exit
    pub tracked_symbol: Option<String>,
    pub last_error: Option<String>,
}

/// Result of one decision cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cycle", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// No regime snapshot has been published yet
    NoSnapshot,
    /// Holdings already match the regime
    Aligned { held: HeldPosition },
    Switched {
        held: HeldPosition,
        desired: HeldPosition,
        exit: Option<ActionOutcome>,
        entry: Option<ActionOutcome>,
    },
}

pub struct DecisionLoop {
    store: Arc<RegimeStateStore>,
    reconciler: PositionReconciler,
    executor: OrderExecutor,
    recorder: Option<Arc<dyn ProbabilityRecorder>>,
    metrics: Arc<Metrics>,
    status: Arc<RwLock<EngineStatus>>,
    config: EngineConfig,
}

impl DecisionLoop {
    pub fn new(
        store: Arc<RegimeStateStore>,
        reconciler: PositionReconciler,
        executor: OrderExecutor,
        metrics: Arc<Metrics>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            executor,
            recorder: None,
            metrics,
            status: Arc::new(RwLock::new(EngineStatus::default())),
            config,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ProbabilityRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn pair(&self) -> &InstrumentPair {
        self.reconciler.pair()
    }

    /// Shared status handle for the health server
    pub fn status_handle(&self) -> Arc<RwLock<EngineStatus>> {
        Arc::clone(&self.status)
    }

    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }

    /// Poll forever. A failed cycle is logged and the next tick runs as usual.
    pub async fn run(&self) {
        let pair = self.pair();
        info!(
            "Decision loop started: target {} hedge {} every {}ms{}",
            pair.target,
            pair.hedge.as_deref().unwrap_or("(none)"),
            self.config.poll_interval.as_millis(),
            if self.executor.is_dry_run() { " [dry run]" } else { "" }
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle().await {
                error!("Decision cycle abandoned: {}", e);
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.metrics.inc_decision_cycles();
        let result = self.cycle().await;

        let mut status = self.status.write().await;
        status.last_cycle_at = Some(Utc::now());
        match &result {
            Ok(_) => status.last_error = None,
            Err(e) => {
                self.metrics.inc_cycle_errors();
                status.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn cycle(&self) -> Result<CycleOutcome> {
        let Some(snapshot) = self.store.current().await else {
            warn!("No regime snapshot published yet; waiting");
            return Ok(CycleOutcome::NoSnapshot);
        };

        let held = self.reconciler.held_position().await?;

        if let Some(recorder) = &self.recorder {
            record_best_effort(
                recorder.as_ref(),
                &snapshot.sample(),
                self.config.record_timeout,
                &self.metrics,
            )
            .await;
        }

        let desired = self.pair().desired(&snapshot);
        {
            let mut status = self.status.write().await;
            status.last_snapshot = Some(snapshot.clone());
            status.last_held = Some(held);
            status.last_desired = Some(desired);
        }

        if desired == held {
            debug!(
                "P(positive)={:.4} threshold {}: holding {}",
                snapshot.probability_positive, snapshot.entry_threshold, held
            );
            return Ok(CycleOutcome::Aligned { held });
        }

        info!(
            "P(positive)={:.4} threshold {} as of {}: switching {} -> {}",
            snapshot.probability_positive, snapshot.entry_threshold, snapshot.as_of, held, desired
        );

        let exit = match self.pair().symbol_of(held) {
            Some(symbol) => {
                let symbol = symbol.to_string();
                let outcome = self.executor.exit(&symbol).await?;
                if matches!(
                    outcome,
                    ActionOutcome::Submitted { .. } | ActionOutcome::NothingToSell
                ) {
                    self.set_tracked(None).await;
                }
                Some(outcome)
            }
            None => None,
        };

        let entry = match self.pair().symbol_of(desired) {
            Some(symbol) => {
                let symbol = symbol.to_string();
                let outcome = self.executor.enter(&symbol).await?;
                if matches!(
                    outcome,
                    ActionOutcome::Submitted { .. } | ActionOutcome::AlreadySatisfied { .. }
                ) {
                    self.set_tracked(Some(symbol)).await;
                }
                Some(outcome)
            }
            None => None,
        };

        Ok(CycleOutcome::Switched {
            held,
            desired,
            exit,
            entry,
        })
    }

    async fn set_tracked(&self, symbol: Option<String>) {
        self.status.write().await.tracked_symbol = symbol;
    }
}
