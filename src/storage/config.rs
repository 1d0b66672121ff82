//! Save-point store configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Save-point store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// One JSON file per job (default)
    #[default]
    File,
    /// In-process only; nothing survives the run
    Memory,
    /// A row per job in a PostgreSQL table
    Postgres,
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown save-point backend '{other}'")),
        }
    }
}

/// Save-point store configuration (`[save_points]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: BackendType,

    /// File backend settings
    #[serde(default)]
    pub file: FileConfig,

    /// PostgreSQL backend settings
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            file: FileConfig::default(),
            postgres: None,
        }
    }
}

/// File storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Directory holding one `<job>.<mode>.savepoint.json` per job
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

/// PostgreSQL storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Connection string; the source connection is reused when absent
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Schema holding the save-point table
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table name
    #[serde(default = "default_table")]
    pub table: String,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            schema: default_schema(),
            table: default_table(),
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Default save-point directory under the platform data dir
pub fn default_base_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "indexsync", "indexsync")
        .map(|dirs| dirs.data_dir().join("savepoints"))
        .unwrap_or_else(|| PathBuf::from(".indexsync").join("savepoints"))
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table() -> String {
    "indexsync_save_points".to_string()
}

fn default_max_connections() -> u32 {
    2
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}
