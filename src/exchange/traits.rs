use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::{AccountSnapshot, BrokerPosition, DailyBar, OpenOrder, OrderIntent};
use crate::error::Result;

/// Broker operations the engine depends on.
///
/// Implementations must tolerate concurrent calls from the refit and
/// decision tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    fn is_dry_run(&self) -> bool;

    async fn is_market_open(&self) -> Result<bool>;

    async fn get_account(&self) -> Result<AccountSnapshot>;

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Returns the broker's order id
    async fn submit_market_order(&self, intent: &OrderIntent) -> Result<String>;

    /// Close of the most recent one-minute bar
    async fn get_latest_price(&self, symbol: &str) -> Result<Decimal>;
}

/// Source of daily closing prices for the regime model
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Bars ordered by date, both ends inclusive
    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>>;
}
