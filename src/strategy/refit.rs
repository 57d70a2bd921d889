//! Refit scheduler
//!
//! Wakes on a wall-clock cadence in the exchange time zone, refits the
//! regime model on fresh daily history and publishes the result. A failed
//! cycle leaves the previous snapshot in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::domain::{DailyBar, RegimeSnapshot};
use crate::error::{ModelError, Result, SwitcherError};
use crate::exchange::{with_deadline, MarketDataSource};
use crate::services::Metrics;
use crate::strategy::estimator::RegimeEstimator;
use crate::strategy::regime_store::RegimeStateStore;

/// Local time each daily return is stamped with
const SESSION_CLOSE_HOUR: u32 = 16;

/// How many trailing probabilities a refit outcome carries
const RECENT_PROBABILITIES: usize = 5;

#[derive(Debug, Clone)]
pub struct RefitConfig {
    pub model_symbol: String,
    pub history_start: NaiveDate,
    pub entry_threshold: f64,
    pub interval_minutes: u32,
    pub offset_minutes: u32,
    pub timezone: Tz,
    pub fetch_timeout: Duration,
}

impl RefitConfig {
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            model_symbol: config.strategy.model_symbol.clone(),
            history_start: config.model.history_start,
            entry_threshold: config.strategy.entry_threshold,
            interval_minutes: config.schedule.refit_interval_minutes,
            offset_minutes: config.schedule.refit_offset_minutes,
            timezone: config.schedule.tz()?,
            // Full history pulls page through many requests
            fetch_timeout: Duration::from_millis(config.schedule.call_timeout_ms.saturating_mul(4)),
        })
    }
}

/// Result of one successful fit, before or after publication
#[derive(Debug, Clone, Serialize)]
pub struct RefitOutcome {
    pub snapshot: RegimeSnapshot,
    pub observations: usize,
    pub iterations: usize,
    pub converged: bool,
    pub log_likelihood: f64,
    pub regime_means: [f64; 2],
    /// Trailing (bar close, P(positive)) pairs, oldest first
    pub recent: Vec<(DateTime<Utc>, f64)>,
}

pub struct RefitScheduler {
    market_data: Arc<dyn MarketDataSource>,
    estimator: Arc<dyn RegimeEstimator>,
    store: Arc<RegimeStateStore>,
    metrics: Arc<Metrics>,
    config: RefitConfig,
}

impl RefitScheduler {
    pub fn new(
        market_data: Arc<dyn MarketDataSource>,
        estimator: Arc<dyn RegimeEstimator>,
        store: Arc<RegimeStateStore>,
        metrics: Arc<Metrics>,
        config: RefitConfig,
    ) -> Self {
        Self {
            market_data,
            estimator,
            store,
            metrics,
            config,
        }
    }

    /// Sleep until each refit slot, then refit. Never returns.
    pub async fn run(&self) {
        let tz = self.config.timezone;
        info!(
            "Refit scheduler started: every {} min at +{} min ({})",
            self.config.interval_minutes, self.config.offset_minutes, tz
        );

        loop {
            let now = Utc::now().with_timezone(&tz);
            let next = next_refit_at(now, self.config.interval_minutes, self.config.offset_minutes);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next refit at {} (in {}s)", next, wait.as_secs());
            tokio::time::sleep(wait).await;

            if let Err(e) = self.refit_now().await {
                warn!("Refit cycle skipped, keeping previous snapshot: {}", e);
            }
        }
    }

    /// Fit and publish immediately
    pub async fn refit_now(&self) -> Result<RefitOutcome> {
        match self.fit_snapshot_at(Utc::now()).await {
            Ok(outcome) => {
                self.store.publish(outcome.snapshot.clone()).await;
                self.metrics.inc_refits_ok();
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.inc_refits_failed();
                error!("Refit failed: {}", e);
                Err(e)
            }
        }
    }

    /// Fit without publishing
    pub async fn fit_snapshot(&self) -> Result<RefitOutcome> {
        self.fit_snapshot_at(Utc::now()).await
    }

    pub async fn fit_snapshot_at(&self, now: DateTime<Utc>) -> Result<RefitOutcome> {
        let tz = self.config.timezone;
        let today = now.with_timezone(&tz).date_naive();
        let end = last_completed_business_day(today);
        let symbol = self.config.model_symbol.as_str();

        debug!(
            "Fetching {} daily bars {} .. {}",
            symbol, self.config.history_start, end
        );
        let bars = with_deadline(
            "get_daily_bars",
            self.config.fetch_timeout,
            self.market_data
                .get_daily_bars(symbol, self.config.history_start, end),
        )
        .await?;

        let (stamps, returns) = log_returns(&bars, tz)?;
        if returns.is_empty() {
            return Err(ModelError::InsufficientData {
                observations: 0,
                required: 1,
            }
            .into());
        }
        let observations = returns.len();

        let estimator = Arc::clone(&self.estimator);
        let fit = tokio::task::spawn_blocking(move || estimator.fit(&returns))
            .await
            .map_err(|e| SwitcherError::Internal(format!("regime fit task failed: {}", e)))??;

        let probabilities = fit.positive_probabilities();
        if probabilities.len() != observations {
            return Err(ModelError::LengthMismatch {
                expected: observations,
                got: probabilities.len(),
            }
            .into());
        }
        let (as_of, probability) = select_closed_bar(&stamps, &probabilities, today, tz)
            .ok_or_else(|| ModelError::InsufficientData {
                observations,
                required: 2,
            })?;

        let tail = stamps.len().saturating_sub(RECENT_PROBABILITIES);
        let recent = stamps[tail..]
            .iter()
            .copied()
            .zip(probabilities[tail..].iter().copied())
            .collect();

        info!(
            "Refit {}: {} returns, {} EM iterations, P(positive)={:.6} as of {}",
            symbol, observations, fit.iterations, probability, as_of
        );

        Ok(RefitOutcome {
            snapshot: RegimeSnapshot {
                probability_positive: probability.clamp(0.0, 1.0),
                as_of,
                entry_threshold: self.config.entry_threshold,
            },
            observations,
            iterations: fit.iterations,
            converged: fit.converged,
            log_likelihood: fit.log_likelihood,
            regime_means: fit.means,
            recent,
        })
    }
}

/// Session close of `date` in `tz`, as UTC
pub fn session_close(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>> {
    let local = date
        .and_hms_opt(SESSION_CLOSE_HOUR, 0, 0)
        .ok_or_else(|| SwitcherError::Internal(format!("invalid close time on {}", date)))?;
    tz.from_local_datetime(&local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| {
            SwitcherError::InvalidMarketData(format!("{} has no local {}:00", date, SESSION_CLOSE_HOUR))
        })
}

/// Log returns of consecutive closes, each stamped with its bar's session
/// close. The first bar only seeds the series.
pub fn log_returns(bars: &[DailyBar], tz: Tz) -> Result<(Vec<DateTime<Utc>>, Vec<f64>)> {
    if let Some(bad) = bars.iter().find(|b| !(b.close.is_finite() && b.close > 0.0)) {
        return Err(SwitcherError::InvalidMarketData(format!(
            "close {} on {} is not a positive price",
            bad.close, bad.date
        )));
    }

    let mut stamps = Vec::with_capacity(bars.len().saturating_sub(1));
    let mut returns = Vec::with_capacity(bars.len().saturating_sub(1));
    for pair in bars.windows(2) {
        stamps.push(session_close(pair[1].date, tz)?);
        returns.push((pair[1].close / pair[0].close).ln());
    }
    Ok((stamps, returns))
}

/// Probability and timestamp of the last fully closed bar.
///
/// When the last stamp falls on `today` in `tz` that session is still open,
/// so the second-to-last value is used instead.
pub fn select_closed_bar(
    stamps: &[DateTime<Utc>],
    probabilities: &[f64],
    today: NaiveDate,
    tz: Tz,
) -> Option<(DateTime<Utc>, f64)> {
    let len = stamps.len().min(probabilities.len());
    let last = len.checked_sub(1)?;
    let index = if stamps[last].with_timezone(&tz).date_naive() == today {
        last.checked_sub(1)?
    } else {
        last
    };
    Some((stamps[index], probabilities[index]))
}

/// The business day before `today`, skipping weekends
pub fn last_completed_business_day(today: NaiveDate) -> NaiveDate {
    let mut day = today - ChronoDuration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day -= ChronoDuration::days(1);
    }
    day
}

/// First refit slot strictly after `now`.
///
/// Slots sit at `k * interval + offset` minutes past local midnight. A slot
/// that does not exist locally (spring-forward gap) is skipped; a repeated
/// one (fall-back) fires at its first occurrence still ahead of `now`.
pub fn next_refit_at(now: DateTime<Tz>, interval_minutes: u32, offset_minutes: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let interval = interval_minutes.clamp(1, 1440);
    let offset = offset_minutes % interval;

    let start = now.date_naive();
    for day_offset in 0..3 {
        let date = start + ChronoDuration::days(day_offset);
        let mut minute = offset;
        while minute < 1440 {
            let Some(local) = date.and_hms_opt(minute / 60, minute % 60, 0) else {
                minute += interval;
                continue;
            };
            let candidates = match tz.from_local_datetime(&local) {
                LocalResult::Single(t) => vec![t],
                LocalResult::Ambiguous(a, b) => vec![a, b],
                LocalResult::None => Vec::new(),
            };
            if let Some(slot) = candidates.into_iter().find(|t| *t > now) {
                return slot;
            }
            minute += interval;
        }
    }

    now + ChronoDuration::minutes(i64::from(interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::estimator::{MockRegimeEstimator, RegimeFit};
    use async_trait::async_trait;
    use chrono::Timelike;
    use chrono_tz::America::New_York;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(d: NaiveDate, close: f64) -> DailyBar {
        DailyBar { date: d, close }
    }

    struct FixedBars(Vec<DailyBar>);

    #[async_trait]
    impl MarketDataSource for FixedBars {
        async fn get_daily_bars(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyBar>> {
            Ok(self.0.clone())
        }
    }

    struct FailingBars;

    #[async_trait]
    impl MarketDataSource for FailingBars {
        async fn get_daily_bars(
            &self,
            symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyBar>> {
            Err(SwitcherError::MarketDataUnavailable(symbol.to_string()))
        }
    }

    fn config() -> RefitConfig {
        RefitConfig {
            model_symbol: "SPY".to_string(),
            history_start: date(2020, 1, 1),
            entry_threshold: 0.55,
            interval_minutes: 60,
            offset_minutes: 5,
            timezone: New_York,
            fetch_timeout: Duration::from_secs(1),
        }
    }

    fn fit_with(positive: &[f64]) -> RegimeFit {
        RegimeFit {
            smoothed: positive.iter().map(|p| [*p, 1.0 - *p]).collect(),
            means: [0.001, -0.002],
            variances: [1e-4, 9e-4],
            transition: [[0.95, 0.05], [0.05, 0.95]],
            log_likelihood: 10.0,
            iterations: 12,
            converged: true,
        }
    }

    fn scheduler(
        bars: Arc<dyn MarketDataSource>,
        estimator: MockRegimeEstimator,
        store: Arc<RegimeStateStore>,
    ) -> (RefitScheduler, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let scheduler = RefitScheduler::new(
            bars,
            Arc::new(estimator),
            store,
            Arc::clone(&metrics),
            config(),
        );
        (scheduler, metrics)
    }

    #[test]
    fn business_day_skips_weekends() {
        // 2024-03-11 is a Monday
        assert_eq!(last_completed_business_day(date(2024, 3, 11)), date(2024, 3, 8));
        assert_eq!(last_completed_business_day(date(2024, 3, 10)), date(2024, 3, 8));
        assert_eq!(last_completed_business_day(date(2024, 3, 9)), date(2024, 3, 8));
        assert_eq!(last_completed_business_day(date(2024, 3, 13)), date(2024, 3, 12));
    }

    #[test]
    fn log_returns_drop_first_bar_and_stamp_close() {
        let bars = vec![
            bar(date(2024, 1, 2), 100.0),
            bar(date(2024, 1, 3), 110.0),
            bar(date(2024, 1, 4), 99.0),
        ];
        let (stamps, returns) = log_returns(&bars, New_York).unwrap();
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - (1.1f64).ln()).abs() < 1e-12);
        assert!((returns[1] - (0.9f64).ln()).abs() < 1e-12);

        // 16:00 EST is 21:00 UTC
        let local = stamps[0].with_timezone(&New_York);
        assert_eq!(local.date_naive(), date(2024, 1, 3));
        assert_eq!(local.hour(), 16);
        assert_eq!(stamps[0].hour(), 21);
    }

    #[test]
    fn log_returns_reject_non_positive_close() {
        let bars = vec![bar(date(2024, 1, 2), 100.0), bar(date(2024, 1, 3), 0.0)];
        assert!(matches!(
            log_returns(&bars, New_York),
            Err(SwitcherError::InvalidMarketData(_))
        ));
    }

    #[test]
    fn single_bar_gives_no_returns() {
        let (stamps, returns) = log_returns(&[bar(date(2024, 1, 2), 100.0)], New_York).unwrap();
        assert!(stamps.is_empty() && returns.is_empty());
    }

    #[test]
    fn open_session_uses_previous_bar() {
        let stamps: Vec<_> = [date(2024, 5, 6), date(2024, 5, 7), date(2024, 5, 8)]
            .into_iter()
            .map(|d| session_close(d, New_York).unwrap())
            .collect();
        let probs = [0.91, 0.95, 0.40];

        let (as_of, p) = select_closed_bar(&stamps, &probs, date(2024, 5, 8), New_York).unwrap();
        assert_eq!(p, 0.95);
        assert_eq!(as_of, stamps[1]);

        let (as_of, p) = select_closed_bar(&stamps, &probs, date(2024, 5, 9), New_York).unwrap();
        assert_eq!(p, 0.40);
        assert_eq!(as_of, stamps[2]);
    }

    #[test]
    fn open_session_with_single_bar_has_nothing_closed() {
        let stamps = vec![session_close(date(2024, 5, 8), New_York).unwrap()];
        assert!(select_closed_bar(&stamps, &[0.7], date(2024, 5, 8), New_York).is_none());
        assert!(select_closed_bar(&[], &[], date(2024, 5, 8), New_York).is_none());
    }

    #[test]
    fn next_refit_is_five_past_next_hour() {
        let now = New_York.with_ymd_and_hms(2024, 5, 8, 10, 17, 0).unwrap();
        let next = next_refit_at(now, 60, 5);
        assert_eq!(next, New_York.with_ymd_and_hms(2024, 5, 8, 11, 5, 0).unwrap());

        let now = New_York.with_ymd_and_hms(2024, 5, 8, 10, 3, 0).unwrap();
        assert_eq!(
            next_refit_at(now, 60, 5),
            New_York.with_ymd_and_hms(2024, 5, 8, 10, 5, 0).unwrap()
        );
    }

    #[test]
    fn next_refit_on_a_slot_moves_to_the_following_one() {
        let now = New_York.with_ymd_and_hms(2024, 5, 8, 10, 5, 0).unwrap();
        assert_eq!(
            next_refit_at(now, 60, 5),
            New_York.with_ymd_and_hms(2024, 5, 8, 11, 5, 0).unwrap()
        );
    }

    #[test]
    fn next_refit_rolls_over_midnight() {
        let now = New_York.with_ymd_and_hms(2024, 5, 8, 23, 30, 0).unwrap();
        assert_eq!(
            next_refit_at(now, 60, 5),
            New_York.with_ymd_and_hms(2024, 5, 9, 0, 5, 0).unwrap()
        );
    }

    #[test]
    fn next_refit_skips_spring_forward_gap() {
        // 02:05 does not exist on 2024-03-10 in New York
        let now = New_York.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap();
        let next = next_refit_at(now, 60, 5);
        assert_eq!(next, New_York.with_ymd_and_hms(2024, 3, 10, 3, 5, 0).unwrap());
        assert_eq!((next - now).num_minutes(), 35);
    }

    #[tokio::test]
    async fn fit_uses_last_closed_bar_when_today_is_open() {
        let today = date(2024, 5, 8);
        let bars = Arc::new(FixedBars(vec![
            bar(date(2024, 5, 3), 100.0),
            bar(date(2024, 5, 6), 101.0),
            bar(date(2024, 5, 7), 102.0),
            bar(today, 100.0),
        ]));
        let mut estimator = MockRegimeEstimator::new();
        estimator
            .expect_fit()
            .withf(|returns| returns.len() == 3)
            .times(1)
            .returning(|_| Ok(fit_with(&[0.91, 0.95, 0.40])));

        let store = Arc::new(RegimeStateStore::new());
        let (scheduler, _) = scheduler(bars, estimator, Arc::clone(&store));

        let now = New_York
            .with_ymd_and_hms(2024, 5, 8, 11, 5, 0)
            .unwrap()
            .with_timezone(&Utc);
        let outcome = scheduler.fit_snapshot_at(now).await.unwrap();

        assert_eq!(outcome.snapshot.probability_positive, 0.95);
        assert_eq!(outcome.snapshot.as_of, session_close(date(2024, 5, 7), New_York).unwrap());
        assert_eq!(outcome.snapshot.entry_threshold, 0.55);
        assert_eq!(outcome.recent.len(), 3);
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn failed_fit_leaves_snapshot_unchanged() {
        let bars = Arc::new(FixedBars(vec![
            bar(date(2024, 5, 3), 100.0),
            bar(date(2024, 5, 6), 101.0),
        ]));
        let mut estimator = MockRegimeEstimator::new();
        estimator
            .expect_fit()
            .returning(|_| Err(ModelError::NonConvergence("singular".to_string())));

        let previous = RegimeSnapshot {
            probability_positive: 0.7,
            as_of: Utc::now(),
            entry_threshold: 0.55,
        };
        let store = Arc::new(RegimeStateStore::with_snapshot(previous.clone()));
        let (scheduler, metrics) = scheduler(bars, estimator, Arc::clone(&store));

        let err = scheduler.refit_now().await.unwrap_err();
        assert!(matches!(err, SwitcherError::Model(_)));
        assert_eq!(store.current().await, Some(previous));
        assert_eq!(store.published().await.unwrap().version, 1);
        assert_eq!(metrics.snapshot().refits_failed, 1);
    }

    #[tokio::test]
    async fn short_smoothed_series_is_rejected() {
        let bars: Vec<DailyBar> = (0..11)
            .map(|i| bar(date(2024, 4, 1) + chrono::Days::new(i), 100.0 + i as f64))
            .collect();
        let mut estimator = MockRegimeEstimator::new();
        estimator.expect_fit().returning(|_| Ok(fit_with(&[0.8, 0.9])));

        let previous = RegimeSnapshot {
            probability_positive: 0.3,
            as_of: Utc::now(),
            entry_threshold: 0.55,
        };
        let store = Arc::new(RegimeStateStore::with_snapshot(previous.clone()));
        let (scheduler, metrics) = scheduler(Arc::new(FixedBars(bars)), estimator, Arc::clone(&store));

        assert!(matches!(
            scheduler.refit_now().await,
            Err(SwitcherError::Model(ModelError::LengthMismatch { expected: 10, got: 2 }))
        ));
        assert_eq!(store.current().await, Some(previous));
        assert_eq!(metrics.snapshot().refits_failed, 1);
    }

    #[tokio::test]
    async fn fetch_failure_skips_fit() {
        let mut estimator = MockRegimeEstimator::new();
        estimator.expect_fit().never();

        let store = Arc::new(RegimeStateStore::new());
        let (scheduler, metrics) = scheduler(Arc::new(FailingBars), estimator, Arc::clone(&store));

        assert!(scheduler.refit_now().await.is_err());
        assert!(store.current().await.is_none());
        assert_eq!(metrics.snapshot().refits_failed, 1);
    }

    #[tokio::test]
    async fn zero_returns_skip_the_cycle() {
        let mut estimator = MockRegimeEstimator::new();
        estimator.expect_fit().never();

        let store = Arc::new(RegimeStateStore::new());
        let bars = Arc::new(FixedBars(vec![bar(date(2024, 5, 3), 100.0)]));
        let (scheduler, _) = scheduler(bars, estimator, Arc::clone(&store));

        assert!(matches!(
            scheduler.refit_now().await,
            Err(SwitcherError::Model(ModelError::InsufficientData { observations: 0, .. }))
        ));
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn successful_refit_publishes() {
        let bars = Arc::new(FixedBars(vec![
            bar(date(2024, 5, 2), 100.0),
            bar(date(2024, 5, 3), 101.0),
        ]));
        let mut estimator = MockRegimeEstimator::new();
        estimator.expect_fit().returning(|_| Ok(fit_with(&[0.62])));

        let store = Arc::new(RegimeStateStore::new());
        let (scheduler, metrics) = scheduler(bars, estimator, Arc::clone(&store));

        let outcome = scheduler.refit_now().await.unwrap();
        assert_eq!(store.current().await, Some(outcome.snapshot));
        assert_eq!(metrics.snapshot().refits_ok, 1);
    }
}
