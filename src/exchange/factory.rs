use std::sync::Arc;
use std::time::Duration;

use crate::adapters::AlpacaClient;
use crate::config::AppConfig;
use crate::error::Result;

use super::{BrokerGateway, MarketDataSource, TimeoutGateway};

/// Gateway handles shared by the engine tasks
#[derive(Clone)]
pub struct Gateways {
    /// Broker calls, each bounded by the engine call timeout
    pub broker: Arc<dyn BrokerGateway>,
    pub market_data: Arc<dyn MarketDataSource>,
    /// Concrete client for operator commands outside the trait surface
    pub alpaca: Arc<AlpacaClient>,
}

/// Create the runtime gateways from `AppConfig`.
///
/// One `AlpacaClient` backs both handles; its HTTP client is safe for
/// concurrent use, so the two tasks share it without a request queue.
pub fn build_gateways(app_config: &AppConfig, dry_run: bool) -> Result<Gateways> {
    let client = Arc::new(AlpacaClient::from_config(&app_config.broker, dry_run)?);
    let limit = Duration::from_millis(app_config.schedule.call_timeout_ms);

    Ok(Gateways {
        broker: Arc::new(TimeoutGateway::new(client.clone(), limit)),
        market_data: client.clone(),
        alpaca: client,
    })
}
