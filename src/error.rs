use thiserror::Error;

/// Main error type for the regime switcher
#[derive(Error, Debug)]
pub enum SwitcherError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    // Model errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SwitcherError
pub type Result<T> = std::result::Result<T, SwitcherError>;

/// Failures of the regime estimator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Insufficient data: {observations} observations, need at least {required}")]
    InsufficientData { observations: usize, required: usize },

    #[error("Non-finite input at index {index}")]
    NonFiniteInput { index: usize },

    #[error("Fit did not converge: {0}")]
    NonConvergence(String),

    #[error("Smoothed series has {got} rows for {expected} returns")]
    LengthMismatch { expected: usize, got: usize },
}
