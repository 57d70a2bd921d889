pub mod health;
pub mod metrics;

pub use health::{
    router as health_router, ComponentHealth, HealthResponse, HealthServer, HealthState,
    HealthStatus, StatusResponse,
};
pub use metrics::{Metrics, MetricsSnapshot};
