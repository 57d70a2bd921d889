use crate::domain::ProbabilitySample;
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{info, instrument};

/// Persisted probability row with its insertion time
#[derive(Debug, Clone)]
pub struct StoredSample {
    pub id: i64,
    pub sample: ProbabilitySample,
    pub target_symbol: String,
    pub recorded_at: DateTime<Utc>,
}

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    // ==================== Probability samples ====================

    /// Insert one probability observation
    #[instrument(skip(self))]
    pub async fn insert_probability_sample(
        &self,
        sample: &ProbabilitySample,
        target_symbol: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO probability_samples (as_of, probability, entry_threshold, target_symbol)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(sample.as_of)
        .bind(sample.probability)
        .bind(sample.entry_threshold)
        .bind(target_symbol)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    /// Most recent samples, newest first
    pub async fn recent_probability_samples(&self, limit: i64) -> Result<Vec<StoredSample>> {
        let rows = sqlx::query(
            r#"
            SELECT id, as_of, probability, entry_threshold, target_symbol, recorded_at
            FROM probability_samples
            ORDER BY recorded_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredSample {
                id: r.get("id"),
                sample: ProbabilitySample {
                    as_of: r.get("as_of"),
                    probability: r.get("probability"),
                    entry_threshold: r.get("entry_threshold"),
                },
                target_symbol: r.get("target_symbol"),
                recorded_at: r.get("recorded_at"),
            })
            .collect())
    }
}
