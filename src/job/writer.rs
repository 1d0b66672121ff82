//! Batch delivery to the search index

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::index::{IndexDocument, IndexError, SearchIndex};

/// Delivers one batch of documents as a single logical operation
#[async_trait]
pub trait JobWriter: Send + Sync {
    async fn write(&self, documents: &[IndexDocument]) -> Result<usize, IndexError>;
}

/// Writes through a [`SearchIndex`], creating the index before the first batch
pub struct IndexWriter {
    index: Arc<dyn SearchIndex>,
    ensured: OnceCell<()>,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self {
            index,
            ensured: OnceCell::new(),
        }
    }
}

#[async_trait]
impl JobWriter for IndexWriter {
    async fn write(&self, documents: &[IndexDocument]) -> Result<usize, IndexError> {
        self.ensured
            .get_or_try_init(|| async {
                debug!("Ensuring index {} exists", self.index.index_name());
                self.index.ensure_index().await
            })
            .await?;
        self.index.bulk_upsert(documents).await
    }
}
