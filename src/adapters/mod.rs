pub mod alpaca;
pub mod postgres;

pub use alpaca::{AlpacaClient, ClockResponse};
pub use postgres::{PostgresStore, StoredSample};
