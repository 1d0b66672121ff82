//! Search index clients
//!
//! Documents are upserted by a stable id, so delivering the same document
//! twice leaves the index in the same state as delivering it once.

pub mod http;
pub mod memory;

pub use http::HttpSearchIndex;
pub use memory::MemorySearchIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A document ready for indexing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Stable document id derived from the source primary key
    pub id: String,
    pub body: Value,
}

impl IndexDocument {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// Index client errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// Transport-level failure talking to the index
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The index answered with an unexpected status
    #[error("{operation} returned status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    /// Some documents in a bulk request were rejected
    #[error("{failed} of {total} documents rejected, first error: {first_error}")]
    Rejected {
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// Request or response body could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Simulated or otherwise unavailable index
    #[error("Index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    pub fn serialization<E: fmt::Display>(err: E) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Transient failures worth retrying at the transport level
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Unavailable(_) => true,
            Self::Rejected { .. } | Self::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

/// Bulk upsert and idempotent index creation
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the destination index if it does not exist
    ///
    /// Must succeed when the index already exists, including when another
    /// caller created it concurrently.
    async fn ensure_index(&self) -> Result<(), IndexError>;

    /// Upsert documents keyed by their id in one logical operation
    async fn bulk_upsert(&self, documents: &[IndexDocument]) -> Result<usize, IndexError>;

    /// Name of the destination index
    fn index_name(&self) -> &str;
}
