//! Paginated extraction from the source of record
//!
//! A [`RecordSource`] returns at most `limit` records positioned after the
//! given save point, ordered by the job mode's progress key. The source is
//! the authority on end-of-data: an empty page ends the run.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;

pub use memory::MemorySource;
#[cfg(feature = "postgres")]
pub use postgres::PostgresSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

use crate::page::PageRequest;
use crate::savepoint::SavePoint;

/// One row read from the source of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Stable primary key, rendered as text
    pub id: String,
    /// Last-modified timestamp; required for timestamp mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Column values keyed by column name
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl SourceRecord {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            updated_at: None,
            fields,
        }
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Primary key as a number, for identifier-keyed jobs
    pub fn numeric_id(&self) -> Option<i64> {
        self.id.parse().ok()
    }
}

/// Order two primary keys numerically when both are integers, bytewise otherwise
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.as_bytes().cmp(b.as_bytes()),
    }
}

/// Source access errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// Could not reach the source
    #[error("Connection error: {0}")]
    Connection(String),

    /// The page query failed
    #[error("Query error: {0}")]
    Query(String),

    /// A row could not be decoded into a record
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// The save point shape does not fit this source's fetch strategy
    #[error("Unsupported cursor: {0}")]
    UnsupportedCursor(String),

    /// Timeout occurred
    #[error("Timeout: query took longer than {0:?}")]
    Timeout(std::time::Duration),
}

impl SourceError {
    pub fn connection<E: fmt::Display>(err: E) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn query<E: fmt::Display>(err: E) -> Self {
        Self::Query(err.to_string())
    }

    pub fn invalid_row<E: fmt::Display>(err: E) -> Self {
        Self::InvalidRow(err.to_string())
    }

    /// Transient failures worth retrying at the transport level
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Paginated query interface over the source of record
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the page that follows `save_point`
    ///
    /// Offset jobs position with `page.offset()`; keyset jobs position with
    /// the save point itself and ignore the page offset. Either way at most
    /// `page.limit()` records are returned.
    async fn fetch(
        &self,
        save_point: &SavePoint,
        page: &PageRequest,
    ) -> Result<Vec<SourceRecord>, SourceError>;

    /// Human-readable name used in logs
    fn describe(&self) -> String;
}
