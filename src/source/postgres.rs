//! PostgreSQL record source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::query::{Bind, SourceTable};
use super::{RecordSource, SourceError, SourceRecord};
use crate::config::SourceConfig;
use crate::page::PageRequest;
use crate::savepoint::{JobMode, SavePoint};

/// Reads pages of rows from one PostgreSQL table
pub struct PostgresSource {
    pool: PgPool,
    table: SourceTable,
    table_name: String,
    mode: JobMode,
}

impl PostgresSource {
    /// Connect to the source database
    pub async fn connect(config: &SourceConfig, mode: JobMode) -> Result<Self, SourceError> {
        info!("Connecting to PostgreSQL source table {}", config.table);

        let connect_options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| SourceError::connection(format!("Invalid connection string: {e}")))?
            .log_statements(log::LevelFilter::Debug)
            .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(5));

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| SourceError::connection(format!("Failed to connect to source: {e}")))?;

        Self::with_pool(pool, config, mode)
    }

    pub fn with_pool(pool: PgPool, config: &SourceConfig, mode: JobMode) -> Result<Self, SourceError> {
        let table = SourceTable::new(
            &config.table,
            &config.id_column,
            config.timestamp_column.as_deref(),
        )
        .map_err(SourceError::query)?;

        Ok(Self {
            pool,
            table,
            table_name: config.table.clone(),
            mode,
        })
    }

    fn decode_row(row: &PgRow) -> Result<SourceRecord, SourceError> {
        let id: String = row.try_get("record_id").map_err(SourceError::invalid_row)?;
        let updated_at: Option<DateTime<Utc>> = row
            .try_get("record_updated_at")
            .map_err(SourceError::invalid_row)?;
        let fields = match row
            .try_get::<JsonValue, _>("record_fields")
            .map_err(SourceError::invalid_row)?
        {
            JsonValue::Object(map) => map,
            other => {
                return Err(SourceError::invalid_row(format!(
                    "row {id} is not a JSON object: {other}"
                )))
            }
        };

        Ok(SourceRecord {
            id,
            updated_at,
            fields,
        })
    }
}

fn classify(err: sqlx::Error) -> SourceError {
    match err {
        sqlx::Error::PoolTimedOut => SourceError::Timeout(Duration::ZERO),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::Tls(_) => {
            SourceError::connection(err)
        }
        other => SourceError::query(other),
    }
}

#[async_trait]
impl RecordSource for PostgresSource {
    async fn fetch(
        &self,
        save_point: &SavePoint,
        page: &PageRequest,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let query = self
            .table
            .page_query(self.mode, save_point, page.offset(), page.limit())?;
        debug!(sql = %query.sql, "Fetching page {}", page);

        let mut statement = sqlx::query(&query.sql);
        for bind in query.binds {
            statement = match bind {
                Bind::Int(value) => statement.bind(value),
                Bind::Text(value) => statement.bind(value),
                Bind::Timestamp(value) => statement.bind(value),
            };
        }

        let rows = statement.fetch_all(&self.pool).await.map_err(classify)?;
        rows.iter().map(Self::decode_row).collect()
    }

    fn describe(&self) -> String {
        format!("postgres:{}", self.table_name)
    }
}
