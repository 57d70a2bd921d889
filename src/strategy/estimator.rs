//! Two-state Gaussian Markov-switching model
//!
//! Each regime has its own mean and variance; the hidden state follows a
//! first-order Markov chain. Parameters are fitted by EM over a scaled
//! forward-backward pass, which also yields the smoothed marginal
//! probability of each regime at every bar.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::ModelError;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Fitted model and its smoothed regime probabilities
#[derive(Debug, Clone, Serialize)]
pub struct RegimeFit {
    /// P(regime j | all observations) per bar; each row sums to 1
    pub smoothed: Vec<[f64; 2]>,
    pub means: [f64; 2],
    pub variances: [f64; 2],
    /// `transition[i][j]` = P(next = j | current = i)
    pub transition: [[f64; 2]; 2],
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl RegimeFit {
    /// The regime with the higher mean return
    pub fn positive_regime(&self) -> usize {
        if self.means[0] >= self.means[1] {
            0
        } else {
            1
        }
    }

    /// Smoothed probability series of the positive regime
    pub fn positive_probabilities(&self) -> Vec<f64> {
        let regime = self.positive_regime();
        self.smoothed.iter().map(|row| row[regime]).collect()
    }
}

/// Fits a two-state regime model to a return series.
///
/// Pure and CPU-bound; callers run it off the async executor.
#[cfg_attr(test, mockall::automock)]
pub trait RegimeEstimator: Send + Sync {
    fn fit(&self, returns: &[f64]) -> Result<RegimeFit, ModelError>;
}

#[derive(Debug, Clone)]
pub struct MarkovSwitchingEstimator {
    max_iterations: usize,
    tolerance: f64,
    min_observations: usize,
}

impl Default for MarkovSwitchingEstimator {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            min_observations: 30,
        }
    }
}

struct Params {
    initial: [f64; 2],
    transition: [[f64; 2]; 2],
    means: [f64; 2],
    variances: [f64; 2],
}

struct EStep {
    smoothed: Vec<[f64; 2]>,
    transitions: [[f64; 2]; 2],
    log_likelihood: f64,
}

impl MarkovSwitchingEstimator {
    pub fn new(max_iterations: usize, tolerance: f64, min_observations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            tolerance,
            min_observations: min_observations.max(2),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.max_iterations, config.tolerance, config.min_observations)
    }

    fn initial_params(y: &[f64]) -> Result<(Params, f64), ModelError> {
        let n = y.len() as f64;
        let mean = y.iter().sum::<f64>() / n;
        let var = y.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        if !(var > 0.0) {
            return Err(ModelError::NonConvergence(
                "return series has zero variance".to_string(),
            ));
        }
        let sd = var.sqrt();

        // Calm regime slightly above the mean, turbulent slightly below
        let params = Params {
            initial: [0.5, 0.5],
            transition: [[0.95, 0.05], [0.05, 0.95]],
            means: [mean + 0.1 * sd, mean - 0.1 * sd],
            variances: [0.5 * var, 2.0 * var],
        };
        Ok((params, var * 1e-6))
    }

    fn expectation(y: &[f64], p: &Params) -> Result<EStep, ModelError> {
        let n = y.len();
        let mut emission = vec![[0.0_f64; 2]; n];
        let mut alpha = vec![[0.0_f64; 2]; n];
        let mut scale = vec![0.0_f64; n];
        let mut log_likelihood = 0.0;

        for t in 0..n {
            let mut log_density = [0.0_f64; 2];
            for j in 0..2 {
                let dev = y[t] - p.means[j];
                log_density[j] = -0.5 * (LN_2PI + p.variances[j].ln() + dev * dev / p.variances[j]);
            }
            let peak = log_density[0].max(log_density[1]);

            let mut total = 0.0;
            for j in 0..2 {
                emission[t][j] = (log_density[j] - peak).exp();
                let prior = if t == 0 {
                    p.initial[j]
                } else {
                    alpha[t - 1][0] * p.transition[0][j] + alpha[t - 1][1] * p.transition[1][j]
                };
                alpha[t][j] = prior * emission[t][j];
                total += alpha[t][j];
            }

            if !(total > 0.0) || !total.is_finite() {
                return Err(ModelError::NonConvergence(format!(
                    "filter degenerated at observation {}",
                    t
                )));
            }
            alpha[t][0] /= total;
            alpha[t][1] /= total;
            scale[t] = total;
            log_likelihood += total.ln() + peak;
        }

        if !log_likelihood.is_finite() {
            return Err(ModelError::NonConvergence(
                "non-finite log-likelihood".to_string(),
            ));
        }

        let mut beta = vec![[1.0_f64; 2]; n];
        for t in (0..n.saturating_sub(1)).rev() {
            for i in 0..2 {
                beta[t][i] = (0..2)
                    .map(|j| p.transition[i][j] * emission[t + 1][j] * beta[t + 1][j])
                    .sum::<f64>()
                    / scale[t + 1];
            }
        }

        let mut smoothed = vec![[0.0_f64; 2]; n];
        for t in 0..n {
            let g0 = alpha[t][0] * beta[t][0];
            let g1 = alpha[t][1] * beta[t][1];
            let norm = g0 + g1;
            smoothed[t] = if norm > 0.0 {
                [g0 / norm, g1 / norm]
            } else {
                alpha[t]
            };
        }

        let mut transitions = [[0.0_f64; 2]; 2];
        for t in 0..n.saturating_sub(1) {
            for i in 0..2 {
                for j in 0..2 {
                    transitions[i][j] += alpha[t][i]
                        * p.transition[i][j]
                        * emission[t + 1][j]
                        * beta[t + 1][j]
                        / scale[t + 1];
                }
            }
        }

        Ok(EStep {
            smoothed,
            transitions,
            log_likelihood,
        })
    }

    fn maximization(y: &[f64], e: &EStep, p: &mut Params, variance_floor: f64) -> Result<(), ModelError> {
        p.initial = e.smoothed[0];

        for i in 0..2 {
            let row_total = e.transitions[i][0] + e.transitions[i][1];
            if row_total > 0.0 {
                for j in 0..2 {
                    p.transition[i][j] = e.transitions[i][j] / row_total;
                }
            }
        }

        for j in 0..2 {
            let weight: f64 = e.smoothed.iter().map(|g| g[j]).sum();
            if !(weight > f64::EPSILON) {
                return Err(ModelError::NonConvergence(format!("regime {} collapsed", j)));
            }
            let mean = e
                .smoothed
                .iter()
                .zip(y)
                .map(|(g, x)| g[j] * x)
                .sum::<f64>()
                / weight;
            let var = e
                .smoothed
                .iter()
                .zip(y)
                .map(|(g, x)| g[j] * (x - mean).powi(2))
                .sum::<f64>()
                / weight;
            p.means[j] = mean;
            p.variances[j] = var.max(variance_floor);
        }

        Ok(())
    }
}

impl RegimeEstimator for MarkovSwitchingEstimator {
    fn fit(&self, returns: &[f64]) -> Result<RegimeFit, ModelError> {
        if returns.len() < self.min_observations {
            return Err(ModelError::InsufficientData {
                observations: returns.len(),
                required: self.min_observations,
            });
        }
        if let Some(index) = returns.iter().position(|x| !x.is_finite()) {
            return Err(ModelError::NonFiniteInput { index });
        }

        let (mut params, variance_floor) = Self::initial_params(returns)?;
        let mut previous_ll = f64::NEG_INFINITY;

        for iteration in 1..=self.max_iterations {
            let e = Self::expectation(returns, &params)?;
            let improvement = e.log_likelihood - previous_ll;
            let converged = improvement.abs() < self.tolerance;

            if converged || iteration == self.max_iterations {
                if !converged {
                    warn!(
                        "EM stopped at iteration cap {} (last improvement {:.3e})",
                        iteration, improvement
                    );
                }
                debug!(
                    "Regime fit: ll={:.4} iterations={} means={:?} variances={:?}",
                    e.log_likelihood, iteration, params.means, params.variances
                );
                return Ok(RegimeFit {
                    smoothed: e.smoothed,
                    means: params.means,
                    variances: params.variances,
                    transition: params.transition,
                    log_likelihood: e.log_likelihood,
                    iterations: iteration,
                    converged,
                });
            }

            previous_ll = e.log_likelihood;
            Self::maximization(returns, &e, &mut params, variance_floor)?;
        }

        Err(ModelError::NonConvergence(
            "no EM iterations were run".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic normal draws (LCG + Box-Muller)
    struct Draws(u64);

    impl Draws {
        fn uniform(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64 + 0.5) / (1u64 << 53) as f64
        }

        fn normal(&mut self, mean: f64, sd: f64) -> f64 {
            let (u1, u2) = (self.uniform(), self.uniform());
            mean + sd * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        }
    }

    /// Alternating 100-bar blocks: calm/up then turbulent/down
    fn two_regime_series() -> (Vec<f64>, Vec<bool>) {
        let mut draws = Draws(42);
        let mut returns = Vec::new();
        let mut calm = Vec::new();
        for block in 0..4 {
            let is_calm = block % 2 == 0;
            for _ in 0..100 {
                let r = if is_calm {
                    draws.normal(0.002, 0.005)
                } else {
                    draws.normal(-0.01, 0.03)
                };
                returns.push(r);
                calm.push(is_calm);
            }
        }
        (returns, calm)
    }

    #[test]
    fn fit_separates_calm_and_turbulent_blocks() {
        let (returns, calm) = two_regime_series();
        let fit = MarkovSwitchingEstimator::default().fit(&returns).unwrap();

        assert_eq!(fit.smoothed.len(), returns.len());
        for row in &fit.smoothed {
            assert!((row[0] + row[1] - 1.0).abs() < 1e-9);
            assert!(row[0] >= 0.0 && row[0] <= 1.0);
        }

        let positive = fit.positive_regime();
        assert!(fit.variances[positive] < fit.variances[1 - positive]);

        let probs = fit.positive_probabilities();
        let avg = |want_calm: bool| {
            let picked: Vec<f64> = probs
                .iter()
                .zip(&calm)
                .filter(|(_, c)| **c == want_calm)
                .map(|(p, _)| *p)
                .collect();
            picked.iter().sum::<f64>() / picked.len() as f64
        };
        assert!(avg(true) > 0.8);
        assert!(avg(false) < 0.2);
    }

    #[test]
    fn transition_rows_are_distributions() {
        let (returns, _) = two_regime_series();
        let fit = MarkovSwitchingEstimator::default().fit(&returns).unwrap();
        for row in fit.transition {
            assert!((row[0] + row[1] - 1.0).abs() < 1e-9);
        }
        assert!(fit.log_likelihood.is_finite());
        assert!(fit.iterations >= 2);
    }

    #[test]
    fn too_few_observations_is_rejected() {
        let err = MarkovSwitchingEstimator::new(100, 1e-8, 30)
            .fit(&[0.01; 5])
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::InsufficientData {
                observations: 5,
                required: 30
            }
        );
    }

    #[test]
    fn empty_series_is_rejected() {
        assert!(matches!(
            MarkovSwitchingEstimator::default().fit(&[]),
            Err(ModelError::InsufficientData { observations: 0, .. })
        ));
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let mut returns = vec![0.01; 40];
        returns[7] = f64::NAN;
        assert_eq!(
            MarkovSwitchingEstimator::default().fit(&returns).unwrap_err(),
            ModelError::NonFiniteInput { index: 7 }
        );
    }

    #[test]
    fn constant_series_does_not_fit() {
        assert!(matches!(
            MarkovSwitchingEstimator::default().fit(&[0.001; 50]),
            Err(ModelError::NonConvergence(_))
        ));
    }

    #[test]
    fn iteration_cap_still_returns_a_fit() {
        let (returns, _) = two_regime_series();
        let fit = MarkovSwitchingEstimator::new(3, 0.0, 30).fit(&returns).unwrap();
        assert_eq!(fit.iterations, 3);
        assert!(!fit.converged);
    }
}
