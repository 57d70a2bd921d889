use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published regime estimate shared between the refit and decision tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    /// Smoothed probability of the positive regime, in [0, 1]
    pub probability_positive: f64,
    /// Close of the last fully closed bar the probability belongs to
    pub as_of: DateTime<Utc>,
    pub entry_threshold: f64,
}

impl RegimeSnapshot {
    pub fn is_risk_on(&self) -> bool {
        self.probability_positive > self.entry_threshold
    }

    pub fn sample(&self) -> ProbabilitySample {
        ProbabilitySample {
            as_of: self.as_of,
            probability: self.probability_positive,
            entry_threshold: self.entry_threshold,
        }
    }
}

/// One row of the probability history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilitySample {
    pub as_of: DateTime<Utc>,
    pub probability: f64,
    pub entry_threshold: f64,
}

/// Daily bar reduced to what the model needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: chrono::NaiveDate,
    pub close: f64,
}
