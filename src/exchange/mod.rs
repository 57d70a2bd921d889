pub mod factory;
mod timeout;
mod traits;

pub use factory::{build_gateways, Gateways};
pub use timeout::{with_deadline, TimeoutGateway};
pub use traits::{BrokerGateway, MarketDataSource};

#[cfg(test)]
pub use traits::MockBrokerGateway;
