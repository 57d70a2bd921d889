//! Deadline wrapper for broker calls.
//!
//! Every call from the decision loop goes through [`TimeoutGateway`] so a
//! hung request fails the current cycle instead of stalling the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::timeout;
use tracing::warn;

use super::BrokerGateway;
use crate::domain::{AccountSnapshot, BrokerPosition, OpenOrder, OrderIntent};
use crate::error::{Result, SwitcherError};

/// Run `fut` with a deadline, mapping expiry to [`SwitcherError::Timeout`]
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {}ms", operation, limit.as_millis());
            Err(SwitcherError::Timeout {
                operation: operation.to_string(),
                elapsed_ms: limit.as_millis() as u64,
            })
        }
    }
}

pub struct TimeoutGateway {
    inner: Arc<dyn BrokerGateway>,
    limit: Duration,
}

impl TimeoutGateway {
    pub fn new(inner: Arc<dyn BrokerGateway>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl BrokerGateway for TimeoutGateway {
    fn is_dry_run(&self) -> bool {
        self.inner.is_dry_run()
    }

    async fn is_market_open(&self) -> Result<bool> {
        with_deadline("is_market_open", self.limit, self.inner.is_market_open()).await
    }

    async fn get_account(&self) -> Result<AccountSnapshot> {
        with_deadline("get_account", self.limit, self.inner.get_account()).await
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        with_deadline("get_positions", self.limit, self.inner.get_positions()).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        with_deadline("get_open_orders", self.limit, self.inner.get_open_orders(symbol)).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        with_deadline("cancel_order", self.limit, self.inner.cancel_order(order_id)).await
    }

    async fn submit_market_order(&self, intent: &OrderIntent) -> Result<String> {
        with_deadline(
            "submit_market_order",
            self.limit,
            self.inner.submit_market_order(intent),
        )
        .await
    }

    async fn get_latest_price(&self, symbol: &str) -> Result<Decimal> {
        with_deadline("get_latest_price", self.limit, self.inner.get_latest_price(symbol)).await
    }
}
