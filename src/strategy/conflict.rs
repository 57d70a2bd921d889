//! Cancels open orders that fight the side about to be traded.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::OrderSide;
use crate::exchange::BrokerGateway;
use crate::services::Metrics;

/// What a conflict sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub cancelled: Vec<String>,
    pub failed: Vec<String>,
    /// Open orders could not be listed; nothing was cancelled
    pub listing_failed: bool,
}

pub struct OrderConflictResolver {
    gateway: Arc<dyn BrokerGateway>,
    metrics: Arc<Metrics>,
}

impl OrderConflictResolver {
    pub fn new(gateway: Arc<dyn BrokerGateway>, metrics: Arc<Metrics>) -> Self {
        Self { gateway, metrics }
    }

    /// Cancel every open order on `symbol` whose side differs from
    /// `desired_side`. Each order gets one cancellation attempt; failures
    /// are logged and left for a later cycle.
    pub async fn resolve(&self, symbol: &str, desired_side: OrderSide) -> ConflictReport {
        let mut report = ConflictReport::default();

        let open = match self.gateway.get_open_orders(symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Could not list open orders for {}: {}", symbol, e);
                report.listing_failed = true;
                return report;
            }
        };

        for order in open.iter().filter(|o| o.side == desired_side.opposite()) {
            match self.gateway.cancel_order(&order.order_id).await {
                Ok(()) => {
                    info!(
                        "Cancelled conflicting {} order {} on {}",
                        order.side, order.order_id, symbol
                    );
                    report.cancelled.push(order.order_id.clone());
                }
                Err(e) => {
                    error!("Failed to cancel order {} on {}: {}", order.order_id, symbol, e);
                    report.failed.push(order.order_id.clone());
                }
            }
        }

        if !report.cancelled.is_empty() {
            self.metrics.add_orders_cancelled(report.cancelled.len() as u64);
        }
        report
    }
}
