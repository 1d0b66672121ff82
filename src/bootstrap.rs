//! Composition root
//!
//! Wires configuration into concrete components:
//! save-point store -> [`SavePointService`] -> [`Job`].

use std::sync::Arc;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::index::{HttpSearchIndex, SearchIndex};
use crate::job::{DocumentProcessor, IndexWriter, Job};
#[cfg(feature = "postgres")]
use crate::page::PageRequest;
use crate::savepoint::SavePointService;
use crate::source::RecordSource;
use crate::storage::{SavePointContainerService, SavePointStoreFactory, StorageError};

/// Command-line adjustments applied on top of the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub page_size: Option<u32>,
    pub max_pages: Option<usize>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut SyncConfig) {
        if let Some(page_size) = self.page_size {
            config.job.page_size = page_size;
        }
        if let Some(max_pages) = self.max_pages {
            config.job.max_pages_per_run = Some(max_pages);
        }
    }
}

/// Open the configured save-point store
pub async fn open_store(
    config: &SyncConfig,
) -> Result<Arc<dyn SavePointContainerService>, SyncError> {
    SavePointStoreFactory::from_config(&config.save_points, Some(&config.source.url))
        .await
        .map_err(|source| match source {
            StorageError::Configuration(message) => SyncError::Configuration(message),
            source => SyncError::StorageUnavailable {
                job: config.job.name.clone(),
                source,
            },
        })
}

/// Save-point service for the configured job
pub async fn save_point_service(config: &SyncConfig) -> Result<SavePointService, SyncError> {
    let store = open_store(config).await?;
    Ok(SavePointService::new(store, &config.job.name, config.job.mode))
}

/// Document processor described by the `[job]` section
pub fn document_processor(config: &SyncConfig) -> DocumentProcessor {
    let processor = DocumentProcessor::new().with_drop_nulls(config.job.drop_nulls);
    match &config.job.fields {
        Some(fields) => processor.with_fields(fields.clone()),
        None => processor,
    }
}

/// Assemble a job from already constructed endpoints
pub fn assemble_job(
    config: &SyncConfig,
    store: Arc<dyn SavePointContainerService>,
    source: Box<dyn RecordSource>,
    index: Arc<dyn SearchIndex>,
) -> Job {
    let save_points = SavePointService::new(store, &config.job.name, config.job.mode);
    Job::new(
        save_points,
        source,
        Box::new(document_processor(config)),
        Box::new(IndexWriter::new(index)),
    )
    .with_page_size(config.job.page_size)
    .with_max_pages(config.job.max_pages_per_run)
    .with_failure_policy(config.job.transform_failure)
    .with_retry(config.retry.clone())
}

/// Build a runnable job against PostgreSQL and the HTTP search index
pub async fn build_job(config: &SyncConfig, overrides: &RunOverrides) -> Result<Job, SyncError> {
    let mut config = config.clone();
    overrides.apply(&mut config);
    config.validate()?;

    let store = open_store(&config).await?;
    let source = connect_source(&config).await?;
    let index = HttpSearchIndex::new(&config.index)
        .map_err(|e| SyncError::configuration(format!("index client: {e}")))?;
    debug!(
        job = %config.job.name,
        index = %config.index.name,
        "Assembled sync job"
    );

    Ok(assemble_job(&config, store, source, Arc::new(index)))
}

#[cfg(feature = "postgres")]
async fn connect_source(config: &SyncConfig) -> Result<Box<dyn RecordSource>, SyncError> {
    use crate::source::PostgresSource;

    let page = PageRequest::first(config.job.page_size)
        .ok_or_else(|| SyncError::configuration("page size must be greater than 0"))?;
    let source = PostgresSource::connect(&config.source, config.job.mode)
        .await
        .map_err(|source| SyncError::SourceUnavailable { page, source })?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "postgres"))]
async fn connect_source(_config: &SyncConfig) -> Result<Box<dyn RecordSource>, SyncError> {
    Err(SyncError::configuration(
        "PostgreSQL source not enabled. Enable with --features postgres",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemorySearchIndex;
    use crate::savepoint::{JobMode, SavePoint};
    use crate::source::{MemorySource, SourceRecord};
    use crate::storage::BackendType;
    use serde_json::{json, Map, Value};

    fn config(dir: &std::path::Path) -> SyncConfig {
        let mut config = SyncConfig::from_toml_str(
            r#"
            [job]
            name = "orders"
            page_size = 2
            fields = ["id"]

            [source]
            url = "postgres://localhost/shop"
            table = "orders"

            [index]
            url = "http://localhost:9200"
            name = "orders-v1"
            "#,
        )
        .unwrap();
        config.save_points.file.base_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        RunOverrides {
            page_size: Some(50),
            max_pages: Some(1),
        }
        .apply(&mut config);
        assert_eq!(config.job.page_size, 50);
        assert_eq!(config.job.max_pages_per_run, Some(1));
    }

    #[tokio::test]
    async fn test_assembled_job_uses_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let store = open_store(&config).await.unwrap();
        let records = (1..=3)
            .map(|i| match json!({"id": i, "secret": "x"}) {
                Value::Object(map) => SourceRecord::new(i.to_string(), map),
                _ => SourceRecord::new(i.to_string(), Map::new()),
            })
            .collect();
        let index = MemorySearchIndex::new("orders-v1");

        let mut job = assemble_job(
            &config,
            store,
            Box::new(MemorySource::new(JobMode::Default, records)),
            Arc::new(index.clone()),
        );
        let report = job.run().await.unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.final_save_point, SavePoint::Offset { offset: 3 });
        assert_eq!(index.get("2").await, Some(json!({"id": 2})));

        let mut service = save_point_service(&config).await.unwrap();
        assert_eq!(
            service.load_save_point().await.unwrap(),
            SavePoint::Offset { offset: 3 }
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_connecting() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.job.page_size = 0;
        let result = build_job(&config, &RunOverrides::default()).await;
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_postgres_store_requires_feature() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.save_points.backend = BackendType::Postgres;
        assert!(matches!(
            open_store(&config).await,
            Err(SyncError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_from_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = config(temp_dir.path());
        config.save_points.backend = BackendType::Memory;
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.health_check().await.unwrap().backend_type, "memory");
    }
}
