//! PostgreSQL save-point backend implementation

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::savepoint::JobMode;
use crate::source::query::quote_ident;
use crate::storage::{
    config::PostgresConfig,
    error::{StorageError, StorageResult},
    traits::SavePointContainerService,
    types::{HealthStatus, SavePointContainer},
};

/// Stores one row per `(job_name, mode)` in a PostgreSQL table
pub struct PostgresBackend {
    pool: PgPool,
    table: String,
}

impl PostgresBackend {
    /// Connect and create the save-point table if it does not exist
    pub async fn new(config: &PostgresConfig, connection_string: &str) -> StorageResult<Self> {
        info!("Initializing PostgreSQL save-point backend");

        let connect_options = PgConnectOptions::from_str(connection_string)
            .map_err(|e| StorageError::configuration(format!("Invalid connection string: {e}")))?
            .log_statements(log::LevelFilter::Debug)
            .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(1));

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::connection(format!("Failed to connect to database: {e}")))?;

        Self::with_pool(pool, config).await
    }

    /// Use an existing pool, e.g. the one already open against the source
    pub async fn with_pool(pool: PgPool, config: &PostgresConfig) -> StorageResult<Self> {
        let table = format!(
            "{}.{}",
            quote_ident(&config.schema).map_err(StorageError::configuration)?,
            quote_ident(&config.table).map_err(StorageError::configuration)?
        );
        let backend = Self { pool, table };
        backend.initialize_schema(&config.schema).await?;
        Ok(backend)
    }

    async fn initialize_schema(&self, schema: &str) -> StorageResult<()> {
        let query = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(schema).map_err(StorageError::configuration)?
        );
        sqlx::query(&query).execute(&self.pool).await?;

        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                job_name TEXT NOT NULL,
                mode TEXT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (job_name, mode)
            )
            "#,
            self.table
        );
        sqlx::query(&query).execute(&self.pool).await?;

        debug!("Save-point table {} ready", self.table);
        Ok(())
    }
}

#[async_trait]
impl SavePointContainerService for PostgresBackend {
    async fn load(&self, job_name: &str, mode: JobMode) -> StorageResult<Option<SavePointContainer>> {
        let query = format!(
            "SELECT data FROM {} WHERE job_name = $1 AND mode = $2",
            self.table
        );
        let row = sqlx::query(&query)
            .bind(job_name)
            .bind(mode.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: JsonValue = row.try_get("data")?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, container: &SavePointContainer) -> StorageResult<()> {
        let query = format!(
            r#"
            INSERT INTO {} (job_name, mode, data, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_name, mode)
            DO UPDATE SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
            "#,
            self.table
        );
        sqlx::query(&query)
            .bind(&container.job_name)
            .bind(container.mode.as_str())
            .bind(serde_json::to_value(container)?)
            .bind(container.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, job_name: &str, mode: JobMode) -> StorageResult<bool> {
        let query = format!("DELETE FROM {} WHERE job_name = $1 AND mode = $2", self.table);
        let result = sqlx::query(&query)
            .bind(job_name)
            .bind(mode.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let healthy = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        Ok(HealthStatus {
            healthy,
            backend_type: "postgres".to_string(),
            details: Some(self.table.clone()),
        })
    }
}
