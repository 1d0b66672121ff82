//! File-based save-point backend implementation

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::savepoint::JobMode;
use crate::storage::{
    config::FileConfig,
    error::{StorageError, StorageResult},
    traits::SavePointContainerService,
    types::{HealthStatus, SavePointContainer},
};

const SAVEPOINT_SUFFIX: &str = ".savepoint.json";

/// Stores each container as a JSON file under a base directory
pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    /// Create a new file backend, creating the base directory if needed
    pub async fn new(config: &FileConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.base_dir).await?;
        Ok(Self {
            base_dir: config.base_dir.clone(),
        })
    }

    /// Get the path for a job's save-point file
    fn get_path(&self, job_name: &str, mode: JobMode) -> PathBuf {
        let key = SavePointContainer::key_for(job_name, mode);
        self.base_dir.join(format!("{key}{SAVEPOINT_SUFFIX}"))
    }

    /// Read JSON file
    async fn read_json(&self, path: &Path) -> StorageResult<SavePointContainer> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(StorageError::serialization)
    }

    /// Write JSON through a temp file and rename over the target
    async fn write_json(&self, path: &Path, data: &SavePointContainer) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SavePointContainerService for FileBackend {
    async fn load(&self, job_name: &str, mode: JobMode) -> StorageResult<Option<SavePointContainer>> {
        let path = self.get_path(job_name, mode);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let container = self.read_json(&path).await?;
        if container.job_name != job_name {
            return Err(StorageError::conflict(format!(
                "{} holds job '{}', expected '{}'",
                path.display(),
                container.job_name,
                job_name
            )));
        }
        Ok(Some(container))
    }

    async fn save(&self, container: &SavePointContainer) -> StorageResult<()> {
        let path = self.get_path(&container.job_name, container.mode);
        self.write_json(&path, container).await?;
        debug!("Wrote save point to {}", path.display());
        Ok(())
    }

    async fn delete(&self, job_name: &str, mode: JobMode) -> StorageResult<bool> {
        let path = self.get_path(job_name, mode);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let writable = fs::metadata(&self.base_dir)
            .await
            .map(|meta| meta.is_dir() && !meta.permissions().readonly())
            .unwrap_or(false);

        Ok(HealthStatus {
            healthy: writable,
            backend_type: "file".to_string(),
            details: Some(self.base_dir.display().to_string()),
        })
    }
}
