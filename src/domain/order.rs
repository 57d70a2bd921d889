use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl TryFrom<&str> for OrderSide {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

/// Which engine action produced an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Entry,
    Exit,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Entry => "entry",
            OrderAction::Exit => "exit",
        }
    }

    pub fn side(&self) -> OrderSide {
        match self {
            OrderAction::Entry => OrderSide::Buy,
            OrderAction::Exit => OrderSide::Sell,
        }
    }
}

/// Market order the engine wants placed (day time-in-force)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub correlation_id: String,
}

impl OrderIntent {
    pub fn new(prefix: &str, action: OrderAction, symbol: &str, quantity: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: action.side(),
            quantity,
            correlation_id: correlation_id(prefix, action, symbol, Utc::now()),
        }
    }

    pub fn entry(prefix: &str, symbol: &str, quantity: u64) -> Self {
        Self::new(prefix, OrderAction::Entry, symbol, quantity)
    }

    pub fn exit(prefix: &str, symbol: &str, quantity: u64) -> Self {
        Self::new(prefix, OrderAction::Exit, symbol, quantity)
    }
}

/// Build a client order id: `{prefix}_{action}_{symbol}_{yyyymmddHHMMSS}_{suffix}`.
///
/// The random suffix keeps two submissions within one second distinct;
/// brokers reject a reused client order id.
pub fn correlation_id(
    prefix: &str,
    action: OrderAction,
    symbol: &str,
    at: DateTime<Utc>,
) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}_{}",
        prefix,
        action.as_str(),
        symbol,
        at.format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}

/// Order resting at the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn correlation_id_embeds_action_symbol_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 8, 14, 30, 5).unwrap();
        let id = correlation_id("regimeswitch", OrderAction::Entry, "SPXL", at);
        assert!(id.starts_with("regimeswitch_entry_SPXL_20240308143005_"));
        assert_eq!(id.len(), "regimeswitch_entry_SPXL_20240308143005_".len() + 8);
    }

    #[test]
    fn correlation_ids_in_same_second_differ() {
        let at = Utc.with_ymd_and_hms(2024, 3, 8, 14, 30, 5).unwrap();
        let a = correlation_id("p", OrderAction::Exit, "SHV", at);
        let b = correlation_id("p", OrderAction::Exit, "SHV", at);
        assert_ne!(a, b);
    }

    #[test]
    fn intent_side_follows_action() {
        assert_eq!(OrderIntent::entry("p", "SPXL", 3).side, OrderSide::Buy);
        assert_eq!(OrderIntent::exit("p", "SPXL", 3).side, OrderSide::Sell);
    }

    #[test]
    fn order_side_parses_broker_strings() {
        assert_eq!(OrderSide::try_from("BUY").unwrap(), OrderSide::Buy);
        assert_eq!(OrderSide::try_from(" sell ").unwrap(), OrderSide::Sell);
        assert!(OrderSide::try_from("short").is_err());
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }
}
