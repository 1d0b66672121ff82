//! In-memory save-point backend for testing and dry runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::savepoint::JobMode;
use crate::storage::{
    error::{StorageError, StorageResult},
    traits::SavePointContainerService,
    types::{HealthStatus, SavePointContainer},
};

/// In-memory save-point backend
///
/// Clones share the same map, so a test can hand one clone to a job and keep
/// another to inspect what was committed.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    containers: Arc<RwLock<HashMap<String, SavePointContainer>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent loads fail as if the store were unreachable
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent saves fail as if the store were unreachable
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of a stored container
    pub async fn get(&self, job_name: &str, mode: JobMode) -> Option<SavePointContainer> {
        let containers = self.containers.read().await;
        containers.get(&SavePointContainer::key_for(job_name, mode)).cloned()
    }
}

#[async_trait]
impl SavePointContainerService for MemoryBackend {
    async fn load(&self, job_name: &str, mode: JobMode) -> StorageResult<Option<SavePointContainer>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("memory backend reads disabled"));
        }
        Ok(self.get(job_name, mode).await)
    }

    async fn save(&self, container: &SavePointContainer) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("memory backend writes disabled"));
        }
        let mut containers = self.containers.write().await;
        containers.insert(container.key(), container.clone());
        Ok(())
    }

    async fn delete(&self, job_name: &str, mode: JobMode) -> StorageResult<bool> {
        let mut containers = self.containers.write().await;
        Ok(containers
            .remove(&SavePointContainer::key_for(job_name, mode))
            .is_some())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let containers = self.containers.read().await;
        Ok(HealthStatus {
            healthy: !self.fail_reads.load(Ordering::SeqCst),
            backend_type: "memory".to_string(),
            details: Some(format!("{} save points", containers.len())),
        })
    }
}
