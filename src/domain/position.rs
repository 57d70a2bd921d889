use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RegimeSnapshot;

/// Account balances relevant to sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: Decimal,
    pub buying_power: Decimal,
    #[serde(default)]
    pub equity: Option<Decimal>,
}

/// Position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
}

/// Canonical holding derived from broker truth each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeldPosition {
    Target,
    Hedge,
    /// Neither instrument, or both at once
    Flat,
}

impl HeldPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeldPosition::Target => "target",
            HeldPosition::Hedge => "hedge",
            HeldPosition::Flat => "flat",
        }
    }
}

impl std::fmt::Display for HeldPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The risk-on instrument and its optional risk-off counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentPair {
    pub target: String,
    pub hedge: Option<String>,
}

impl InstrumentPair {
    pub fn new(target: impl Into<String>, hedge: Option<String>) -> Self {
        Self {
            target: target.into(),
            hedge,
        }
    }

    /// Symbol backing a holding, `None` for `Flat`
    pub fn symbol_of(&self, position: HeldPosition) -> Option<&str> {
        match position {
            HeldPosition::Target => Some(self.target.as_str()),
            HeldPosition::Hedge => self.hedge.as_deref(),
            HeldPosition::Flat => None,
        }
    }

    /// Collapse broker positions into a canonical holding.
    ///
    /// Exactly one of the pair held with positive quantity wins; both or
    /// neither is `Flat`.
    pub fn classify(&self, positions: &[BrokerPosition]) -> HeldPosition {
        let holds = |symbol: &str| {
            positions
                .iter()
                .any(|p| p.symbol.eq_ignore_ascii_case(symbol) && p.quantity > Decimal::ZERO)
        };

        let has_target = holds(&self.target);
        let has_hedge = self.hedge.as_deref().map(holds).unwrap_or(false);

        match (has_target, has_hedge) {
            (true, false) => HeldPosition::Target,
            (false, true) => HeldPosition::Hedge,
            _ => HeldPosition::Flat,
        }
    }

    /// Desired holding for a regime reading.
    ///
    /// Strictly above the threshold is risk-on. Risk-off is the hedge, or
    /// `Flat` when no hedge is configured.
    pub fn desired(&self, snapshot: &RegimeSnapshot) -> HeldPosition {
        if snapshot.is_risk_on() {
            HeldPosition::Target
        } else if self.hedge.is_some() {
            HeldPosition::Hedge
        } else {
            HeldPosition::Flat
        }
    }
}

/// Quantity held in `symbol`, zero when absent
pub fn quantity_held(positions: &[BrokerPosition], symbol: &str) -> Decimal {
    positions
        .iter()
        .filter(|p| p.symbol.eq_ignore_ascii_case(symbol))
        .map(|p| p.quantity)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn pair() -> InstrumentPair {
        InstrumentPair::new("SPXL", Some("SHV".to_string()))
    }

    fn pos(symbol: &str, quantity: Decimal) -> BrokerPosition {
        BrokerPosition {
            symbol: symbol.to_string(),
            quantity,
            avg_entry_price: dec!(100),
        }
    }

    fn snapshot(p: f64, threshold: f64) -> RegimeSnapshot {
        RegimeSnapshot {
            probability_positive: p,
            as_of: Utc::now(),
            entry_threshold: threshold,
        }
    }

    #[test]
    fn classify_single_hedge_holding() {
        let positions = vec![pos("SPXL", dec!(0)), pos("SHV", dec!(5))];
        assert_eq!(pair().classify(&positions), HeldPosition::Hedge);
    }

    #[test]
    fn classify_both_held_is_flat() {
        let positions = vec![pos("SPXL", dec!(3)), pos("SHV", dec!(2))];
        assert_eq!(pair().classify(&positions), HeldPosition::Flat);
    }

    #[test]
    fn classify_nothing_held_is_flat() {
        assert_eq!(pair().classify(&[]), HeldPosition::Flat);
    }

    #[test]
    fn classify_ignores_unrelated_symbols() {
        let positions = vec![pos("AAPL", dec!(10)), pos("spxl", dec!(4))];
        assert_eq!(pair().classify(&positions), HeldPosition::Target);
    }

    #[test]
    fn classify_without_hedge_only_sees_target() {
        let long_flat = InstrumentPair::new("SPXL", None);
        let positions = vec![pos("SHV", dec!(5))];
        assert_eq!(long_flat.classify(&positions), HeldPosition::Flat);
        let positions = vec![pos("SPXL", dec!(1)), pos("SHV", dec!(5))];
        assert_eq!(long_flat.classify(&positions), HeldPosition::Target);
    }

    #[test]
    fn desired_is_strictly_above_threshold() {
        let pair = pair();
        assert_eq!(pair.desired(&snapshot(0.62, 0.55)), HeldPosition::Target);
        assert_eq!(pair.desired(&snapshot(0.55, 0.55)), HeldPosition::Hedge);
        assert_eq!(pair.desired(&snapshot(0.10, 0.55)), HeldPosition::Hedge);
    }

    #[test]
    fn desired_never_flat_with_hedge() {
        let pair = pair();
        for i in 0..=100 {
            let p = i as f64 / 100.0;
            assert_ne!(pair.desired(&snapshot(p, 0.5)), HeldPosition::Flat);
        }
    }

    #[test]
    fn desired_without_hedge_goes_flat() {
        let long_flat = InstrumentPair::new("SPXL", None);
        assert_eq!(long_flat.desired(&snapshot(0.40, 0.55)), HeldPosition::Flat);
        assert_eq!(long_flat.symbol_of(HeldPosition::Hedge), None);
    }

    #[test]
    fn quantity_held_sums_matching_rows() {
        let positions = vec![pos("SPXL", dec!(3)), pos("SHV", dec!(2))];
        assert_eq!(quantity_held(&positions, "SPXL"), dec!(3));
        assert_eq!(quantity_held(&positions, "TLT"), dec!(0));
    }
}
