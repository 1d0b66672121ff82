//! Storage factory for creating save-point stores

use std::sync::Arc;

use super::backends::{FileBackend, MemoryBackend};
#[cfg(feature = "postgres")]
use super::backends::PostgresBackend;
use super::config::{BackendType, StorageConfig};
use super::error::{StorageError, StorageResult};
use super::traits::SavePointContainerService;

/// Factory for creating save-point stores
pub struct SavePointStoreFactory;

impl SavePointStoreFactory {
    /// Create a store from explicit configuration
    ///
    /// `fallback_connection` is used by the PostgreSQL backend when its own
    /// connection string is not set, so save points can live next to the
    /// source tables.
    pub async fn from_config(
        config: &StorageConfig,
        fallback_connection: Option<&str>,
    ) -> StorageResult<Arc<dyn SavePointContainerService>> {
        match config.backend {
            BackendType::File => {
                let backend = FileBackend::new(&config.file).await?;
                Ok(Arc::new(backend))
            }
            BackendType::Memory => Ok(Arc::new(MemoryBackend::new())),
            #[cfg(feature = "postgres")]
            BackendType::Postgres => {
                let pg_config = config.postgres.clone().unwrap_or_default();
                let connection = pg_config
                    .connection_string
                    .as_deref()
                    .or(fallback_connection)
                    .ok_or_else(|| {
                        StorageError::configuration(
                            "PostgreSQL save-point backend needs a connection string",
                        )
                    })?
                    .to_string();
                let backend = PostgresBackend::new(&pg_config, &connection).await?;
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "postgres"))]
            BackendType::Postgres => {
                let _ = fallback_connection;
                Err(StorageError::configuration(
                    "PostgreSQL backend not enabled. Enable with --features postgres",
                ))
            }
        }
    }
}
