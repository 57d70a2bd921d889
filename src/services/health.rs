//! Health check HTTP server
//!
//! Liveness and readiness probes for process supervision, the engine's
//! current view on `/status`, and counters in Prometheus format.

use crate::services::{Metrics, MetricsSnapshot};
use crate::strategy::{EngineStatus, PublishedSnapshot, RegimeStateStore};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Body of `/status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub uptime_seconds: u64,
    pub dry_run: bool,
    pub snapshot: Option<PublishedSnapshot>,
    pub engine: EngineStatus,
    pub metrics: MetricsSnapshot,
}

/// Shared state for health server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    store: Arc<RegimeStateStore>,
    engine: Arc<RwLock<EngineStatus>>,
    metrics: Arc<Metrics>,
    /// A decision cycle older than this marks the loop unhealthy
    pub cycle_staleness_secs: i64,
}

impl HealthState {
    pub fn new(
        store: Arc<RegimeStateStore>,
        engine: Arc<RwLock<EngineStatus>>,
        metrics: Arc<Metrics>,
        dry_run: bool,
    ) -> Self {
        Self {
            started_at: Utc::now(),
            dry_run,
            store,
            engine,
            metrics,
            cycle_staleness_secs: 60,
        }
    }

    pub fn with_cycle_staleness(mut self, secs: i64) -> Self {
        self.cycle_staleness_secs = secs;
        self
    }

    fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let now = Utc::now();
        let mut components = Vec::new();

        // Regime model
        let published = self.store.published().await;
        components.push(match &published {
            Some(p) => ComponentHealth {
                name: "regime_model".to_string(),
                status: HealthStatus::Healthy,
                message: Some(format!(
                    "v{} P(positive)={:.4}",
                    p.version, p.snapshot.probability_positive
                )),
                last_check: Some(p.published_at),
            },
            None => ComponentHealth {
                name: "regime_model".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some("No snapshot published".to_string()),
                last_check: None,
            },
        });

        // Decision loop
        let engine = self.engine.read().await.clone();
        let (loop_status, loop_message) = match engine.last_cycle_at {
            None => (HealthStatus::Unhealthy, Some("No cycle yet".to_string())),
            Some(at) if (now - at).num_seconds() > self.cycle_staleness_secs => {
                (HealthStatus::Unhealthy, Some("Decision loop stalled".to_string()))
            }
            Some(_) => match engine.last_error {
                Some(e) => (HealthStatus::Degraded, Some(e)),
                None => (HealthStatus::Healthy, None),
            },
        };
        components.push(ComponentHealth {
            name: "decision_loop".to_string(),
            status: loop_status,
            message: loop_message,
            last_check: engine.last_cycle_at,
        });

        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        HealthResponse {
            status,
            timestamp: now,
            uptime_seconds: self.uptime_seconds(),
            components,
        }
    }

    pub async fn get_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_seconds: self.uptime_seconds(),
            dry_run: self.dry_run,
            snapshot: self.store.published().await,
            engine: self.engine.read().await.clone(),
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Routes served by the health server
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Start the health server
    pub async fn run(&self) -> crate::Result<()> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::SwitcherError::Internal(format!("Health server error: {}", e)))?;

        Ok(())
    }
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe: the process is up
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn status_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(state.get_status().await)
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let mut body = state.metrics.prometheus();
    if let Some(p) = state.store.published().await {
        body.push_str(&format!(
            "\n# HELP switcher_probability_positive Published P(positive regime)\n\
             # TYPE switcher_probability_positive gauge\n\
             switcher_probability_positive {}\n",
            p.snapshot.probability_positive
        ));
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        body,
    )
}
