use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::domain::{quantity_held, OrderIntent, OrderSide};
use crate::error::{Result, SwitcherError};
use crate::exchange::BrokerGateway;
use crate::services::Metrics;
use crate::strategy::conflict::OrderConflictResolver;

/// Sizing and naming knobs for entry/exit orders
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub order_prefix: String,
    /// Share of buying power committed on entry
    pub allocation_fraction: Decimal,
    /// Holding worth at least this share of the allocation counts as entered
    pub sufficiency_ratio: Decimal,
}

impl From<&StrategyConfig> for ExecutorConfig {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            order_prefix: config.order_prefix.clone(),
            allocation_fraction: config.allocation_fraction,
            sufficiency_ratio: config.sufficiency_ratio,
        }
    }
}

/// What an entry or exit attempt ended up doing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    MarketClosed,
    Submitted {
        order_id: String,
        correlation_id: String,
        quantity: u64,
    },
    /// Existing holding already covers the intended allocation
    AlreadySatisfied { held: Decimal },
    InsufficientBuyingPower,
    NothingToSell,
}

impl ActionOutcome {
    pub fn submitted(&self) -> bool {
        matches!(self, ActionOutcome::Submitted { .. })
    }
}

/// Whole-share entry size: `floor(buying_power * fraction / price)` and the
/// dollar allocation it targets. `None` when not even one share fits.
pub fn size_entry(
    buying_power: Decimal,
    allocation_fraction: Decimal,
    price: Decimal,
) -> Option<(u64, Decimal)> {
    if price <= Decimal::ZERO || buying_power <= Decimal::ZERO {
        return None;
    }
    let allocation = buying_power * allocation_fraction;
    let quantity = (allocation / price).floor().to_u64()?;
    (quantity > 0).then_some((quantity, allocation))
}

/// Places fire-and-forget market orders; fills are never awaited.
pub struct OrderExecutor {
    gateway: Arc<dyn BrokerGateway>,
    resolver: OrderConflictResolver,
    metrics: Arc<Metrics>,
    config: ExecutorConfig,
}

impl OrderExecutor {
    pub fn new(gateway: Arc<dyn BrokerGateway>, metrics: Arc<Metrics>, config: ExecutorConfig) -> Self {
        let resolver = OrderConflictResolver::new(Arc::clone(&gateway), Arc::clone(&metrics));
        Self {
            gateway,
            resolver,
            metrics,
            config,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.gateway.is_dry_run()
    }

    /// Buy `symbol` with the configured share of buying power
    pub async fn enter(&self, symbol: &str) -> Result<ActionOutcome> {
        if !self.gateway.is_market_open().await? {
            info!("Market closed; skipping entry into {}", symbol);
            return Ok(ActionOutcome::MarketClosed);
        }

        self.resolver.resolve(symbol, OrderSide::Buy).await;

        let account = self.gateway.get_account().await?;
        let price = self.gateway.get_latest_price(symbol).await?;
        if price <= Decimal::ZERO {
            return Err(SwitcherError::InvalidMarketData(format!(
                "latest price for {} is {}",
                symbol, price
            )));
        }

        let Some((quantity, allocation)) =
            size_entry(account.buying_power, self.config.allocation_fraction, price)
        else {
            warn!(
                "Buying power {} buys no {} at {}; skipping entry",
                account.buying_power, symbol, price
            );
            return Ok(ActionOutcome::InsufficientBuyingPower);
        };

        let positions = self.gateway.get_positions().await?;
        let held = quantity_held(&positions, symbol);
        if held * price >= allocation * self.config.sufficiency_ratio {
            info!(
                "Already holding {} {} (worth {} of {} allocation); no entry order",
                held,
                symbol,
                held * price,
                allocation
            );
            return Ok(ActionOutcome::AlreadySatisfied { held });
        }

        debug!(
            "Entry sizing for {}: buying power {} x {} / {} = {} shares",
            symbol, account.buying_power, self.config.allocation_fraction, price, quantity
        );
        self.submit(OrderIntent::entry(&self.config.order_prefix, symbol, quantity))
            .await
    }

    /// Sell the whole holding in `symbol`
    pub async fn exit(&self, symbol: &str) -> Result<ActionOutcome> {
        if !self.gateway.is_market_open().await? {
            info!("Market closed; skipping exit from {}", symbol);
            return Ok(ActionOutcome::MarketClosed);
        }

        self.resolver.resolve(symbol, OrderSide::Sell).await;

        let positions = self.gateway.get_positions().await?;
        let quantity = quantity_held(&positions, symbol)
            .floor()
            .to_u64()
            .unwrap_or(0);
        if quantity == 0 {
            info!("No {} held; nothing to exit", symbol);
            return Ok(ActionOutcome::NothingToSell);
        }

        self.submit(OrderIntent::exit(&self.config.order_prefix, symbol, quantity))
            .await
    }

    async fn submit(&self, intent: OrderIntent) -> Result<ActionOutcome> {
        let order_id = self.gateway.submit_market_order(&intent).await?;
        self.metrics.inc_orders_submitted();
        info!(
            "{} {} {} submitted: order {} ({}){}",
            intent.side,
            intent.quantity,
            intent.symbol,
            order_id,
            intent.correlation_id,
            if self.is_dry_run() { " [dry run]" } else { "" }
        );
        Ok(ActionOutcome::Submitted {
            order_id,
            correlation_id: intent.correlation_id,
            quantity: intent.quantity,
        })
    }
}
