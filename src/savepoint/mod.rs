//! Save-point management for resumable sync runs
//!
//! A save point marks a position in the source ordering such that every record
//! before it is durably in the index. [`SavePointService`] loads the last
//! persisted value, derives the candidate for a fetched batch, and persists it
//! once the batch has been written. Persisting happens strictly after the
//! write; the service refuses candidates that would move progress backwards.

pub mod mode;


pub use mode::{JobMode, ModeStrategy, ProgressKeyError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SyncError;
use crate::source::SourceRecord;
use crate::storage::{
    HealthStatus, SavePointContainer, SavePointContainerService, SAVEPOINT_FORMAT_VERSION,
};

/// Progress marker for one job mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SavePoint {
    /// Number of records consumed in primary-key order
    Offset { offset: u64 },
    /// Last committed `(timestamp, id)` pair
    Timestamp {
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_id: Option<String>,
    },
    /// Last committed numeric identifier
    Identifier {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_id: Option<i64>,
    },
}

impl SavePoint {
    /// Mode this save point's shape belongs to
    pub fn mode(&self) -> JobMode {
        match self {
            Self::Offset { .. } => JobMode::Default,
            Self::Timestamp { .. } => JobMode::Timestamp,
            Self::Identifier { .. } => JobMode::Legacy,
        }
    }

    /// Page offset implied by this save point (zero for keyset modes)
    pub fn offset(&self) -> u64 {
        match self {
            Self::Offset { offset } => *offset,
            _ => 0,
        }
    }

    /// Order against another save point of the same mode
    pub fn compare(&self, other: &SavePoint) -> Option<Ordering> {
        (self.mode().strategy().compare)(self, other)
    }
}

impl fmt::Display for SavePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offset { offset } => write!(f, "offset {offset}"),
            Self::Timestamp {
                timestamp,
                last_id: Some(id),
            } => write!(f, "timestamp {} (id {id})", timestamp.to_rfc3339()),
            Self::Timestamp {
                timestamp,
                last_id: None,
            } => write!(f, "timestamp {}", timestamp.to_rfc3339()),
            Self::Identifier { last_id: Some(id) } => write!(f, "id {id}"),
            Self::Identifier { last_id: None } => f.write_str("id <start>"),
        }
    }
}

/// One fetched page and the save point it establishes once committed
#[derive(Debug, Clone)]
pub struct JobBatch {
    records: Vec<SourceRecord>,
    origin: SavePoint,
    candidate: SavePoint,
}

impl JobBatch {
    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Save point the batch was fetched from
    pub fn origin(&self) -> &SavePoint {
        &self.origin
    }

    /// Save point that becomes durable when this batch commits
    pub fn candidate(&self) -> &SavePoint {
        &self.candidate
    }

    pub fn into_parts(self) -> (Vec<SourceRecord>, SavePoint) {
        (self.records, self.candidate)
    }
}

/// Loads, derives, and persists save points for a single job
pub struct SavePointService {
    store: Arc<dyn SavePointContainerService>,
    job_name: String,
    mode: JobMode,
    run_id: Uuid,
    last_saved: Option<SavePoint>,
    records_indexed: u64,
}

impl SavePointService {
    pub fn new(
        store: Arc<dyn SavePointContainerService>,
        job_name: impl Into<String>,
        mode: JobMode,
    ) -> Self {
        Self {
            store,
            job_name: job_name.into(),
            mode,
            run_id: Uuid::new_v4(),
            last_saved: None,
            records_indexed: 0,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn mode(&self) -> JobMode {
        self.mode
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Total records indexed across all runs, as of the last load or save
    pub fn records_indexed(&self) -> u64 {
        self.records_indexed
    }

    /// Load the persisted save point
    ///
    /// On a job's first run the container does not exist yet; it is created
    /// holding the mode's initial value and that value is returned.
    ///
    /// A store failure is returned as [`SyncError::StorageUnavailable`] so that a
    /// storage glitch never silently restarts the job from scratch.
    pub async fn load_save_point(&mut self) -> Result<SavePoint, SyncError> {
        let container = self
            .store
            .load(&self.job_name, self.mode)
            .await
            .map_err(|source| SyncError::StorageUnavailable {
                job: self.job_name.clone(),
                source,
            })?;

        let save_point = match container {
            Some(container) => {
                self.validate_container(&container)?;
                debug!(
                    job = %self.job_name,
                    save_point = %container.save_point,
                    updated_at = %container.updated_at,
                    "Loaded persisted save point"
                );
                self.records_indexed = container.records_indexed;
                container.save_point
            }
            None => {
                let container = SavePointContainer::initial(&self.job_name, self.mode);
                self.store
                    .save(&container)
                    .await
                    .map_err(|source| SyncError::StorageUnavailable {
                        job: self.job_name.clone(),
                        source,
                    })?;
                info!(
                    job = %self.job_name,
                    mode = %self.mode,
                    "No save point found, created container starting from {}",
                    container.save_point
                );
                self.records_indexed = 0;
                container.save_point
            }
        };

        self.last_saved = Some(save_point.clone());
        Ok(save_point)
    }

    fn validate_container(&self, container: &SavePointContainer) -> Result<(), SyncError> {
        if container.version > SAVEPOINT_FORMAT_VERSION {
            return Err(SyncError::Configuration(format!(
                "save point format version {} is newer than supported version {}",
                container.version, SAVEPOINT_FORMAT_VERSION
            )));
        }
        if container.mode != self.mode || container.save_point.mode() != self.mode {
            return Err(SyncError::Configuration(format!(
                "job '{}' is configured for {} mode but its stored save point is {}",
                self.job_name, self.mode, container.save_point
            )));
        }
        Ok(())
    }

    /// Save point reached once `records`, fetched from `origin`, are committed
    pub fn define_save_point(
        &self,
        origin: &SavePoint,
        records: &[SourceRecord],
    ) -> Result<SavePoint, SyncError> {
        Ok((self.mode.strategy().advance)(origin, records)?)
    }

    /// Pair a fetched page with its candidate save point
    pub fn define_batch(
        &self,
        origin: SavePoint,
        records: Vec<SourceRecord>,
    ) -> Result<JobBatch, SyncError> {
        let candidate = self.define_save_point(&origin, &records)?;
        Ok(JobBatch {
            records,
            origin,
            candidate,
        })
    }

    /// Durably persist `save_point` after its batch has been written
    pub async fn save_save_point(
        &mut self,
        save_point: &SavePoint,
        records_written: usize,
    ) -> Result<(), SyncError> {
        if let Some(previous) = &self.last_saved {
            match save_point.compare(previous) {
                Some(Ordering::Less) | None => {
                    return Err(SyncError::SavePointRegression {
                        job: self.job_name.clone(),
                        previous: previous.to_string(),
                        candidate: save_point.to_string(),
                    });
                }
                _ => {}
            }
        }

        let records_indexed = self.records_indexed + records_written as u64;
        let container = SavePointContainer {
            job_name: self.job_name.clone(),
            mode: self.mode,
            save_point: save_point.clone(),
            version: SAVEPOINT_FORMAT_VERSION,
            updated_at: Utc::now(),
            run_id: Some(self.run_id),
            records_indexed,
        };

        self.store
            .save(&container)
            .await
            .map_err(|source| SyncError::CheckpointPersist {
                last_durable: self
                    .last_saved
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| self.mode.initial_save_point().to_string()),
                source,
            })?;

        debug!(job = %self.job_name, save_point = %save_point, "Persisted save point");
        self.last_saved = Some(save_point.clone());
        self.records_indexed = records_indexed;
        Ok(())
    }

    /// Health of the underlying save-point store
    pub async fn store_health(&self) -> Result<HealthStatus, SyncError> {
        self.store
            .health_check()
            .await
            .map_err(|source| SyncError::StorageUnavailable {
                job: self.job_name.clone(),
                source,
            })
    }

    /// Remove the persisted save point so the next run starts over
    pub async fn reset(&mut self) -> Result<bool, SyncError> {
        let removed = self
            .store
            .delete(&self.job_name, self.mode)
            .await
            .map_err(|source| SyncError::StorageUnavailable {
                job: self.job_name.clone(),
                source,
            })?;
        self.last_saved = None;
        self.records_indexed = 0;
        Ok(removed)
    }
}
