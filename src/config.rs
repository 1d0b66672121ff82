//! Job configuration
//!
//! Loaded from a TOML file, then overridden by `INDEXSYNC_*` environment
//! variables, then validated before any connection is opened.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::SyncError;
use crate::job::TransformFailurePolicy;
use crate::retry::RetryPolicy;
use crate::savepoint::JobMode;
use crate::source::query::SourceTable;
use crate::storage::{BackendType, StorageConfig};

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "INDEXSYNC_";

/// Complete configuration of one sync job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub job: JobConfig,
    pub source: SourceConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub save_points: StorageConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// `[job]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job name; keys the save point
    pub name: String,

    #[serde(default)]
    pub mode: JobMode,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Stop after this many committed pages; unset drains the source
    #[serde(default)]
    pub max_pages_per_run: Option<usize>,

    #[serde(default)]
    pub transform_failure: TransformFailurePolicy,

    /// Columns copied into documents; unset copies the whole row
    #[serde(default)]
    pub fields: Option<Vec<String>>,

    #[serde(default)]
    pub drop_nulls: bool,
}

/// `[source]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// PostgreSQL connection string
    pub url: String,

    /// Source table, optionally schema-qualified
    pub table: String,

    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Last-modified column; required in timestamp mode
    #[serde(default)]
    pub timestamp_column: Option<String>,

    #[serde(default = "default_source_connections")]
    pub max_connections: u32,

    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

/// `[index]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the search cluster
    pub url: String,

    /// Destination index name
    pub name: String,

    /// Settings and mappings sent when the index is created
    #[serde(default)]
    pub definition: Option<Value>,

    #[serde(with = "humantime_serde", default = "default_index_timeout")]
    pub timeout: Duration,

    /// Wait for written documents to become searchable
    #[serde(default)]
    pub refresh: bool,
}

impl SyncConfig {
    /// Read a TOML config file and apply environment overrides
    pub async fn load(path: &Path) -> Result<Self, SyncError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SyncError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&content)
            .map_err(|e| SyncError::configuration(format!("{}: {e}", path.display())))?;
        config.merge_env_vars()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SyncError> {
        toml::from_str(content).map_err(|e| SyncError::configuration(e.to_string()))
    }

    /// Apply `INDEXSYNC_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) -> Result<(), SyncError> {
        self.merge_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn merge_env_with<F>(&mut self, lookup: F) -> Result<(), SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(name) = var("JOB_NAME") {
            self.job.name = name;
        }
        if let Some(mode) = var("JOB_MODE") {
            self.job.mode = mode.parse().map_err(SyncError::Configuration)?;
        }
        if let Some(size) = var("PAGE_SIZE") {
            self.job.page_size = size.parse().map_err(|_| {
                SyncError::configuration(format!("{ENV_PREFIX}PAGE_SIZE is not a number: {size}"))
            })?;
        }
        if let Some(url) = var("SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(url) = var("INDEX_URL") {
            self.index.url = url;
        }
        if let Some(name) = var("INDEX_NAME") {
            self.index.name = name;
        }
        if let Some(backend) = var("SAVEPOINT_BACKEND") {
            self.save_points.backend = backend.parse().map_err(SyncError::Configuration)?;
        }
        if let Some(dir) = var("SAVEPOINT_DIR") {
            self.save_points.file.base_dir = PathBuf::from(dir);
        }
        if let Some(url) = var("SAVEPOINT_URL") {
            self.save_points
                .postgres
                .get_or_insert_with(Default::default)
                .connection_string = Some(url);
        }
        Ok(())
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), SyncError> {
        let job = &self.job;
        if job.name.trim().is_empty() {
            return Err(SyncError::configuration("job.name must not be empty"));
        }
        if job
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(SyncError::configuration(format!(
                "job.name '{}' may only contain letters, digits, '-', '_' and '.'",
                job.name
            )));
        }
        if job.page_size == 0 {
            return Err(SyncError::configuration("job.page_size must be greater than 0"));
        }
        if job.max_pages_per_run == Some(0) {
            return Err(SyncError::configuration(
                "job.max_pages_per_run must be greater than 0 when set",
            ));
        }
        if let Some(fields) = &job.fields {
            if fields.is_empty() {
                return Err(SyncError::configuration("job.fields must not be empty when set"));
            }
        }

        let source = &self.source;
        SourceTable::new(
            &source.table,
            &source.id_column,
            source.timestamp_column.as_deref(),
        )
        .map_err(|e| SyncError::configuration(format!("source: {e}")))?;
        if job.mode == JobMode::Timestamp && source.timestamp_column.is_none() {
            return Err(SyncError::configuration(
                "timestamp mode requires source.timestamp_column",
            ));
        }
        if source.max_connections == 0 {
            return Err(SyncError::configuration(
                "source.max_connections must be greater than 0",
            ));
        }

        Url::parse(&self.index.url).map_err(|e| {
            SyncError::configuration(format!("index.url '{}' is invalid: {e}", self.index.url))
        })?;
        let name = &self.index.name;
        if name.is_empty()
            || name.starts_with(['-', '_', '+'])
            || name.chars().any(|c| c.is_ascii_uppercase() || "\\/*?\"<>| ,#:".contains(c))
        {
            return Err(SyncError::configuration(format!(
                "index.name '{name}' is not a valid index name"
            )));
        }
        if let Some(definition) = &self.index.definition {
            if !definition.is_object() {
                return Err(SyncError::configuration("index.definition must be a table"));
            }
        }

        if self.save_points.backend == BackendType::File
            && self.save_points.file.base_dir.as_os_str().is_empty()
        {
            return Err(SyncError::configuration("save_points.file.base_dir must be set"));
        }

        let retry = &self.retry;
        if retry.backoff_multiplier < 1.0 {
            return Err(SyncError::configuration(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(SyncError::configuration(
                "retry.initial_delay must not exceed retry.max_delay",
            ));
        }
        Ok(())
    }
}

fn default_page_size() -> u32 {
    500
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_source_connections() -> u32 {
    2
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_index_timeout() -> Duration {
    Duration::from_secs(30)
}
