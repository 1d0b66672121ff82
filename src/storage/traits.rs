//! Core trait definition for save-point storage

use async_trait::async_trait;

use super::error::StorageResult;
use super::types::{HealthStatus, SavePointContainer};
use crate::savepoint::JobMode;

/// Durable storage of save-point containers keyed by job name and mode
///
/// Puts must be atomic per key. Implementations do no cross-process locking:
/// running two instances of the same job at once is not supported.
#[async_trait]
pub trait SavePointContainerService: Send + Sync {
    /// Load the container for a job, `None` if the job has never committed
    async fn load(&self, job_name: &str, mode: JobMode) -> StorageResult<Option<SavePointContainer>>;

    /// Replace the stored container
    async fn save(&self, container: &SavePointContainer) -> StorageResult<()>;

    /// Remove the stored container, returning whether one existed
    async fn delete(&self, job_name: &str, mode: JobMode) -> StorageResult<bool>;

    /// Check the health of the storage backend
    async fn health_check(&self) -> StorageResult<HealthStatus>;
}
