//! Best-effort persistence of observed probabilities.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapters::PostgresStore;
use crate::domain::ProbabilitySample;
use crate::error::Result;
use crate::exchange::with_deadline;
use crate::services::Metrics;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProbabilityRecorder: Send + Sync {
    async fn record(&self, sample: &ProbabilitySample) -> Result<()>;
}

/// Writes samples to the `probability_samples` table
pub struct PostgresRecorder {
    store: PostgresStore,
    target_symbol: String,
}

impl PostgresRecorder {
    pub fn new(store: PostgresStore, target_symbol: impl Into<String>) -> Self {
        Self {
            store,
            target_symbol: target_symbol.into(),
        }
    }
}

#[async_trait]
impl ProbabilityRecorder for PostgresRecorder {
    async fn record(&self, sample: &ProbabilitySample) -> Result<()> {
        let id = self
            .store
            .insert_probability_sample(sample, &self.target_symbol)
            .await?;
        debug!("Recorded probability sample {}", id);
        Ok(())
    }
}

/// Record one sample, swallowing and counting any failure
pub async fn record_best_effort(
    recorder: &dyn ProbabilityRecorder,
    sample: &ProbabilitySample,
    limit: Duration,
    metrics: &Metrics,
) -> bool {
    match with_deadline("record_probability", limit, recorder.record(sample)).await {
        Ok(()) => true,
        Err(e) => {
            metrics.inc_recorder_failures();
            warn!("Failed to record probability sample: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwitcherError;
    use chrono::Utc;

    fn sample() -> ProbabilitySample {
        ProbabilitySample {
            as_of: Utc::now(),
            probability: 0.62,
            entry_threshold: 0.55,
        }
    }

    #[tokio::test]
    async fn failure_is_swallowed_and_counted() {
        let mut recorder = MockProbabilityRecorder::new();
        recorder
            .expect_record()
            .times(1)
            .returning(|_| Err(SwitcherError::Internal("db down".to_string())));
        let metrics = Metrics::new();

        let ok = record_best_effort(&recorder, &sample(), Duration::from_secs(1), &metrics).await;
        assert!(!ok);
        assert_eq!(metrics.snapshot().recorder_failures, 1);
    }

    #[tokio::test]
    async fn success_passes_sample_through() {
        let expected = sample();
        let mut recorder = MockProbabilityRecorder::new();
        let want = expected.clone();
        recorder
            .expect_record()
            .withf(move |s: &ProbabilitySample| *s == want)
            .times(1)
            .returning(|_| Ok(()));
        let metrics = Metrics::new();

        assert!(record_best_effort(&recorder, &expected, Duration::from_secs(1), &metrics).await);
        assert_eq!(metrics.snapshot().recorder_failures, 0);
    }
}
