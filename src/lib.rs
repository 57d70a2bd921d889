pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod services;
pub mod strategy;

pub use config::AppConfig;
pub use error::{ModelError, Result, SwitcherError};
pub use exchange::{BrokerGateway, MarketDataSource};
pub use strategy::{DecisionLoop, RefitScheduler, RegimeStateStore};
