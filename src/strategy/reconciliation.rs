//! Position reconciliation
//!
//! Classifies the broker's live holdings into a single [`HeldPosition`].
//! Nothing is cached between calls; every decision cycle asks the broker.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::{quantity_held, BrokerPosition, HeldPosition, InstrumentPair};
use crate::error::Result;
use crate::exchange::BrokerGateway;

/// Holdings as seen in one reconciliation pass
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub held: HeldPosition,
    pub positions: Vec<BrokerPosition>,
}

pub struct PositionReconciler {
    gateway: Arc<dyn BrokerGateway>,
    pair: InstrumentPair,
}

impl PositionReconciler {
    pub fn new(gateway: Arc<dyn BrokerGateway>, pair: InstrumentPair) -> Self {
        Self { gateway, pair }
    }

    pub fn pair(&self) -> &InstrumentPair {
        &self.pair
    }

    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let positions = self.gateway.get_positions().await?;
        let held = self.pair.classify(&positions);

        if held == HeldPosition::Flat {
            if let Some(hedge) = self.pair.hedge.as_deref() {
                if quantity_held(&positions, &self.pair.target) > Decimal::ZERO
                    && quantity_held(&positions, hedge) > Decimal::ZERO
                {
                    warn!(
                        "Holding both {} and {}; treating as flat",
                        self.pair.target, hedge
                    );
                }
            }
        }

        debug!("Reconciled {} broker positions -> {}", positions.len(), held);
        Ok(Reconciliation { held, positions })
    }

    pub async fn held_position(&self) -> Result<HeldPosition> {
        Ok(self.reconcile().await?.held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockBrokerGateway;
    use rust_decimal_macros::dec;

    fn pos(symbol: &str, quantity: Decimal) -> BrokerPosition {
        BrokerPosition {
            symbol: symbol.to_string(),
            quantity,
            avg_entry_price: dec!(50),
        }
    }

    fn reconciler(positions: Vec<BrokerPosition>) -> PositionReconciler {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_get_positions()
            .times(1)
            .returning(move || Ok(positions.clone()));
        PositionReconciler::new(
            Arc::new(gateway),
            InstrumentPair::new("SPXL", Some("SHV".to_string())),
        )
    }

    #[tokio::test]
    async fn zero_target_with_hedge_is_hedge() {
        let r = reconciler(vec![pos("SPXL", dec!(0)), pos("SHV", dec!(5))]);
        assert_eq!(r.held_position().await.unwrap(), HeldPosition::Hedge);
    }

    #[tokio::test]
    async fn both_held_is_flat() {
        let r = reconciler(vec![pos("SPXL", dec!(3)), pos("SHV", dec!(2))]);
        assert_eq!(r.held_position().await.unwrap(), HeldPosition::Flat);
    }

    #[tokio::test]
    async fn nothing_held_is_flat() {
        let r = reconciler(vec![]);
        let rec = r.reconcile().await.unwrap();
        assert_eq!(rec.held, HeldPosition::Flat);
        assert!(rec.positions.is_empty());
    }

    #[tokio::test]
    async fn broker_error_propagates() {
        let mut gateway = MockBrokerGateway::new();
        gateway
            .expect_get_positions()
            .returning(|| Err(crate::error::SwitcherError::Broker("503".to_string())));
        let r = PositionReconciler::new(Arc::new(gateway), InstrumentPair::new("SPXL", None));
        assert!(r.held_position().await.is_err());
    }
}
