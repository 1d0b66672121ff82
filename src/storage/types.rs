//! Persisted save-point representation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::savepoint::{JobMode, SavePoint};

/// Version for save-point container format compatibility
pub const SAVEPOINT_FORMAT_VERSION: u32 = 1;

/// Durable record of a job's progress, keyed by job name and mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePointContainer {
    pub job_name: String,
    pub mode: JobMode,
    pub save_point: SavePoint,
    /// Container format version
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Run that last committed this container
    #[serde(default)]
    pub run_id: Option<Uuid>,
    /// Documents written across all runs
    #[serde(default)]
    pub records_indexed: u64,
}

impl SavePointContainer {
    /// Fresh container holding the mode's initial save point
    pub fn initial(job_name: impl Into<String>, mode: JobMode) -> Self {
        Self {
            job_name: job_name.into(),
            mode,
            save_point: mode.initial_save_point(),
            version: SAVEPOINT_FORMAT_VERSION,
            updated_at: Utc::now(),
            run_id: None,
            records_indexed: 0,
        }
    }

    /// Storage key for a job name and mode
    pub fn key_for(job_name: &str, mode: JobMode) -> String {
        format!("{job_name}.{mode}")
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.job_name, self.mode)
    }
}

/// Backend health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub backend_type: String,
    pub details: Option<String>,
}
