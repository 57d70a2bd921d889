use chrono::NaiveDate;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, SwitcherError};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub strategy: StrategyConfig,
    pub model: ModelConfig,
    pub schedule: ScheduleConfig,
    pub database: DatabaseConfig,
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health server port (disabled when unset)
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Clone, Deserialize)]
pub struct BrokerConfig {
    /// Trading API base URL (paper or live)
    pub trading_url: String,
    /// Market data API base URL
    pub data_url: String,
    /// Market data feed ("iex" or "sip")
    #[serde(default = "default_data_feed")]
    pub data_feed: String,
    /// Per-request HTTP timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// API key id; falls back to APCA_API_KEY_ID
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret; falls back to APCA_API_SECRET_KEY
    #[serde(default)]
    pub api_secret: Option<String>,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("trading_url", &self.trading_url)
            .field("data_url", &self.data_url)
            .field("data_feed", &self.data_feed)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_data_feed() -> String {
    "iex".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Symbol whose daily returns drive the regime model (e.g., "SPY")
    pub model_symbol: String,
    /// Risk-on instrument held while the positive regime is likely
    pub target_symbol: String,
    /// Risk-off instrument; unset means go flat instead
    #[serde(default)]
    pub hedge_symbol: Option<String>,
    /// Enter the target when P(positive) is strictly above this
    pub entry_threshold: f64,
    /// Fraction of buying power allocated per entry (e.g., 0.95)
    pub allocation_fraction: Decimal,
    /// Existing holding at or above this share of the allocation counts as entered
    #[serde(default = "default_sufficiency_ratio")]
    pub sufficiency_ratio: Decimal,
    /// Prefix of every client order id
    #[serde(default = "default_order_prefix")]
    pub order_prefix: String,
}

fn default_sufficiency_ratio() -> Decimal {
    Decimal::new(95, 2)
}

fn default_order_prefix() -> String {
    "regimeswitch".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// First day of history fed to the model
    pub history_start: NaiveDate,
    /// EM iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Log-likelihood improvement below which EM stops
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Fewer returns than this aborts the fit
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
}

fn default_max_iterations() -> usize {
    1000
}

fn default_tolerance() -> f64 {
    1e-8
}

fn default_min_observations() -> usize {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// IANA name of the exchange time zone
    pub timezone: String,
    /// Refit cadence in minutes; must divide a day
    pub refit_interval_minutes: u32,
    /// Minutes past each cadence boundary at which the refit runs
    pub refit_offset_minutes: u32,
    /// Decision loop polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Upper bound on any single external call from the engine
    pub call_timeout_ms: u64,
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| SwitcherError::Validation(format!("invalid timezone: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Record probability samples to PostgreSQL
    #[serde(default)]
    pub enabled: bool,
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Enable dry run mode (no real orders)
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_name() -> String {
    "regime-switcher.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
            file_name: default_log_file_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config_dir`, then the environment
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("broker.trading_url", "https://paper-api.alpaca.markets")?
            .set_default("broker.data_url", "https://data.alpaca.markets")?
            .set_default("strategy.model_symbol", "SPY")?
            .set_default("strategy.target_symbol", "SPXL")?
            .set_default("strategy.entry_threshold", 0.55)?
            .set_default("strategy.allocation_fraction", "0.95")?
            .set_default("model.history_start", "1990-01-01")?
            .set_default("schedule.timezone", "America/New_York")?
            .set_default("schedule.refit_interval_minutes", 60)?
            .set_default("schedule.refit_offset_minutes", 5)?
            .set_default("schedule.poll_interval_ms", 5000)?
            .set_default("schedule.call_timeout_ms", 15_000)?
            .set_default("database.enabled", false)?
            .set_default("database.url", "postgres://localhost/regime_switcher")?
            .set_default("database.max_connections", 5)?
            .set_default("dry_run.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SWITCHER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SWITCHER__STRATEGY__ENTRY_THRESHOLD, etc.)
            .add_source(
                Environment::with_prefix("SWITCHER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Shipped defaults as a value, for unit tests
    #[cfg(test)]
    pub(crate) fn default_config(dry_run: bool) -> Self {
        use rust_decimal_macros::dec;

        Self {
            broker: BrokerConfig {
                trading_url: "https://paper-api.alpaca.markets".to_string(),
                data_url: "https://data.alpaca.markets".to_string(),
                data_feed: default_data_feed(),
                request_timeout_ms: default_request_timeout(),
                api_key: None,
                api_secret: None,
            },
            strategy: StrategyConfig {
                model_symbol: "SPY".to_string(),
                target_symbol: "SPXL".to_string(),
                hedge_symbol: Some("SHV".to_string()),
                entry_threshold: 0.55,
                allocation_fraction: dec!(0.95),
                sufficiency_ratio: dec!(0.95),
                order_prefix: default_order_prefix(),
            },
            model: ModelConfig {
                history_start: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
                max_iterations: default_max_iterations(),
                tolerance: default_tolerance(),
                min_observations: default_min_observations(),
            },
            schedule: ScheduleConfig {
                timezone: "America/New_York".to_string(),
                refit_interval_minutes: 60,
                refit_offset_minutes: 5,
                poll_interval_ms: 5000,
                call_timeout_ms: 15_000,
            },
            database: DatabaseConfig {
                enabled: false,
                url: "postgres://localhost/regime_switcher".to_string(),
                max_connections: default_max_connections(),
            },
            dry_run: DryRunConfig { enabled: dry_run },
            logging: LoggingConfig::default(),
            health_port: Some(8080),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let threshold = self.strategy.entry_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(format!("entry_threshold must be within [0, 1], got {threshold}"));
        }

        let fraction = self.strategy.allocation_fraction;
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            errors.push(format!("allocation_fraction must be within (0, 1], got {fraction}"));
        }

        if self.strategy.sufficiency_ratio <= Decimal::ZERO
            || self.strategy.sufficiency_ratio > Decimal::ONE
        {
            errors.push("sufficiency_ratio must be within (0, 1]".to_string());
        }

        if self.strategy.target_symbol.trim().is_empty() {
            errors.push("target_symbol must not be empty".to_string());
        }

        if let Some(hedge) = &self.strategy.hedge_symbol {
            if hedge.eq_ignore_ascii_case(&self.strategy.target_symbol) {
                errors.push("hedge_symbol must differ from target_symbol".to_string());
            }
        }

        let interval = self.schedule.refit_interval_minutes;
        if interval == 0 || (24 * 60) % interval != 0 {
            errors.push(format!(
                "refit_interval_minutes must divide a day evenly, got {interval}"
            ));
        } else if self.schedule.refit_offset_minutes >= interval {
            errors.push("refit_offset_minutes must be less than refit_interval_minutes".to_string());
        }

        if self.schedule.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be positive".to_string());
        }

        if self.schedule.call_timeout_ms == 0 {
            errors.push("call_timeout_ms must be positive".to_string());
        }

        if let Err(e) = self.schedule.tz() {
            errors.push(e.to_string());
        }

        if self.model.min_observations < 2 {
            errors.push("min_observations must be at least 2".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default_config(true);
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.sufficiency_ratio, dec!(0.95));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = AppConfig::default_config(true);
        config.strategy.entry_threshold = 1.5;
        config.strategy.allocation_fraction = dec!(0);
        config.strategy.hedge_symbol = Some("spxl".to_string());
        config.schedule.refit_interval_minutes = 7;
        config.schedule.timezone = "Mars/Olympus".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_offset_must_fit_inside_interval() {
        let mut config = AppConfig::default_config(true);
        config.schedule.refit_offset_minutes = 60;
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("refit_offset_minutes"));
    }

    #[test]
    fn test_env_overrides_section_key() {
        std::env::set_var("SWITCHER__STRATEGY__ENTRY_THRESHOLD", "0.7");
        let loaded = AppConfig::load_from("does-not-exist");
        std::env::remove_var("SWITCHER__STRATEGY__ENTRY_THRESHOLD");

        let config = loaded.unwrap();
        assert_eq!(config.strategy.entry_threshold, 0.7);
        assert_eq!(config.strategy.target_symbol, "SPXL");
    }

    #[test]
    fn test_broker_debug_redacts_secret() {
        let mut config = AppConfig::default_config(true);
        config.broker.api_secret = Some("hunter2".to_string());
        let rendered = format!("{:?}", config.broker);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
