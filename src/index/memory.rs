//! In-memory search index for tests and dry runs

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{IndexDocument, IndexError, SearchIndex};

/// Documents keyed by id, shared between clones
#[derive(Clone)]
pub struct MemorySearchIndex {
    name: String,
    documents: Arc<RwLock<BTreeMap<String, Value>>>,
    exists: Arc<AtomicBool>,
    ensure_calls: Arc<AtomicUsize>,
    bulk_calls: Arc<AtomicUsize>,
    fail_on_bulk_call: Arc<AtomicUsize>,
}

impl MemorySearchIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Arc::new(RwLock::new(BTreeMap::new())),
            exists: Arc::new(AtomicBool::new(false)),
            ensure_calls: Arc::new(AtomicUsize::new(0)),
            bulk_calls: Arc::new(AtomicUsize::new(0)),
            fail_on_bulk_call: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the n-th bulk call (1-based, counted from now on) fail; 0 disables
    pub fn fail_on_bulk_call(&self, n: usize) {
        let target = if n == 0 {
            0
        } else {
            self.bulk_calls.load(Ordering::SeqCst) + n
        };
        self.fail_on_bulk_call.store(target, Ordering::SeqCst);
    }

    pub fn exists(&self) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of the index contents
    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.documents.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Value> {
        self.documents.read().await.get(id).cloned()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn ensure_index(&self) -> Result<(), IndexError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        self.exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn bulk_upsert(&self, documents: &[IndexDocument]) -> Result<usize, IndexError> {
        let call = self.bulk_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_bulk_call.load(Ordering::SeqCst) {
            return Err(IndexError::Rejected {
                failed: documents.len(),
                total: documents.len(),
                first_error: format!("injected failure on bulk call {call}"),
            });
        }
        if !self.exists() {
            return Err(IndexError::Status {
                operation: format!("bulk write to {}", self.name),
                status: 404,
                body: "index_not_found_exception".to_string(),
            });
        }

        let mut stored = self.documents.write().await;
        for document in documents {
            stored.insert(document.id.clone(), document.body.clone());
        }
        Ok(documents.len())
    }

    fn index_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_bulk_upsert_is_idempotent() {
        let index = MemorySearchIndex::new("orders");
        index.ensure_index().await.unwrap();
        let docs = vec![
            IndexDocument::new("1", json!({"v": 1})),
            IndexDocument::new("2", json!({"v": 2})),
        ];

        index.bulk_upsert(&docs).await.unwrap();
        let once = index.snapshot().await;
        index.bulk_upsert(&docs).await.unwrap();

        assert_eq!(index.snapshot().await, once);
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn test_write_without_index_fails() {
        let index = MemorySearchIndex::new("orders");
        let err = index
            .bulk_upsert(&[IndexDocument::new("1", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_hits_requested_call() {
        let index = MemorySearchIndex::new("orders");
        index.ensure_index().await.unwrap();
        index.fail_on_bulk_call(2);
        let doc = [IndexDocument::new("1", json!({}))];

        assert!(index.bulk_upsert(&doc).await.is_ok());
        assert!(index.bulk_upsert(&doc).await.is_err());
        assert!(index.bulk_upsert(&doc).await.is_ok());
    }
}
