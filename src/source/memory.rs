//! In-memory record source for fixtures and tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{RecordSource, SourceError, SourceRecord};
use crate::page::PageRequest;
use crate::savepoint::{JobMode, SavePoint};

/// Serves pages from a fixed set of records using the mode's ordering
///
/// Clones share records and counters.
#[derive(Clone)]
pub struct MemorySource {
    mode: JobMode,
    records: Arc<RwLock<Vec<SourceRecord>>>,
    fetches: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySource {
    pub fn new(mode: JobMode, records: Vec<SourceRecord>) -> Self {
        Self {
            mode,
            records: Arc::new(RwLock::new(records)),
            fetches: Arc::new(AtomicUsize::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add or replace a record by id
    pub async fn upsert(&self, record: SourceRecord) {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Number of fetch calls served, including empty pages
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Simulate the source going away
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch(
        &self,
        save_point: &SavePoint,
        page: &PageRequest,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::connection("memory source marked unavailable"));
        }
        if save_point.mode() != self.mode {
            return Err(SourceError::UnsupportedCursor(format!(
                "{} mode cannot fetch from {save_point}",
                self.mode
            )));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let strategy = self.mode.strategy();
        let records = self.records.read().await;
        let mut matching: Vec<SourceRecord> = records
            .iter()
            .filter(|record| (strategy.admits)(save_point, record))
            .cloned()
            .collect();
        matching.sort_by(strategy.order_records);

        let skip = if self.mode.is_positional() {
            usize::try_from(page.offset()).map_err(SourceError::query)?
        } else {
            0
        };
        Ok(matching
            .into_iter()
            .skip(skip)
            .take(page.limit() as usize)
            .collect())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.mode)
    }
}
