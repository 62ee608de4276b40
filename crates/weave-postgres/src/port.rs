//! Pooled PostgreSQL execution port

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::Postgres;
use tracing::{debug, info, instrument};
use weave_core::{ExecutionPort, Result, Row, Value, WeaveError};
use weave_shared::{exponential_backoff, DatabaseConfig, QueryMetrics, RetryFuture};

use crate::decode::decode_row;

/// [`ExecutionPort`] backed by a sqlx connection pool
#[derive(Clone)]
pub struct PgExecutionPort {
    pool: PgPool,
}

impl PgExecutionPort {
    /// Connect a new pool, retrying with the configured backoff
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Creating PostgreSQL connection pool");

        let attempts = config.connect_attempts.max(1);
        // every attempt may wait out the acquire timeout plus one backoff
        let deadline = (Duration::from_secs(config.connection_timeout)
            + Duration::from_millis(config.retry_backoff.max_delay_ms + config.retry_backoff.jitter_ms))
            * attempts;

        let retry = exponential_backoff(config.retry_backoff.clone(), attempts);
        let pool = retry
            .execute_with_timeout(
                || -> RetryFuture<PgPool, sqlx::Error> {
                    let options = PgPoolOptions::new()
                        .max_connections(config.max_connections)
                        .acquire_timeout(Duration::from_secs(config.connection_timeout))
                        .idle_timeout(Duration::from_secs(config.idle_timeout));
                    let url = config.url.clone();
                    Box::pin(async move { options.connect(&url).await })
                },
                deadline,
            )
            .await
            .map_err(|e| WeaveError::DatabaseError(format!("Failed to create pool: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Test database connectivity
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WeaveError::DatabaseError(format!("Connection test failed: {}", e)))?;

        Ok(())
    }
}

fn bind_all<'q>(sql: &'q str, params: &'q [Value]) -> Query<'q, Postgres, PgArguments> {
    params.iter().fold(sqlx::query(sql), |query, value| match value {
        // untyped nulls are sent as text
        Value::Null => query.bind(None::<String>),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Bool(b) => query.bind(*b),
        Value::Json(j) => query.bind(Json(j)),
    })
}

fn database_error(e: sqlx::Error) -> WeaveError {
    WeaveError::DatabaseError(e.to_string())
}

#[async_trait]
impl ExecutionPort for PgExecutionPort {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let started = Instant::now();
        let rows = bind_all(sql, params)
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        QueryMetrics::database_operation("fetch_all", started.elapsed());
        debug!(rows = rows.len(), "fetched rows");

        rows.iter()
            .map(|row| decode_row(row).map_err(WeaveError::from))
            .collect()
    }

    async fn execute_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let started = Instant::now();
        let row = bind_all(sql, params)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;
        QueryMetrics::database_operation("fetch_optional", started.elapsed());

        Ok(row.as_ref().map(decode_row).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_shared::WeaveConfig;

    fn config() -> DatabaseConfig {
        let mut config = WeaveConfig::default().database;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.url = url;
        }
        config.connect_attempts = 1;
        config
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL server
    async fn test_health_check() -> Result<()> {
        let port = PgExecutionPort::connect(&config()).await?;
        port.health_check().await
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL server
    async fn test_binds_and_decodes() -> Result<()> {
        let port = PgExecutionPort::connect(&config()).await?;
        let rows = port
            .execute(
                "SELECT $1::int8 AS \"0.id\", $2::text AS \"0.name\", NULL::text AS \"0.bio\" \
                 FROM (VALUES (1)) AS v(x) WHERE x = ANY (VALUES ($3::int4),($4::int4))",
                &[Value::Int(7), "Ann".into(), Value::Int(1), Value::Int(2)],
            )
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("0.id"), Some(&Value::Int(7)));
        assert_eq!(rows[0].get("0.name"), Some(&Value::Text("Ann".into())));
        assert_eq!(rows[0].get("0.bio"), Some(&Value::Null));

        let none = port
            .execute_one("SELECT 1 AS one WHERE false", &[])
            .await?;
        assert!(none.is_none());
        Ok(())
    }
}
