//! Resumable sync run
//!
//! A [`Job`] pulls pages from a [`RecordSource`], maps every record through a
//! [`JobProcessor`], hands the documents to a [`JobWriter`], and only then
//! persists the batch's save point. Any stage failure ends the run with the
//! save point at its last committed value, so the next run replays at most
//! the page that failed.

pub mod processor;
pub mod writer;

#[cfg(test)]
mod tests;

pub use processor::{DocumentProcessor, JobProcessor, TransformError, TransformFailurePolicy};
pub use writer::{IndexWriter, JobWriter};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::SyncError;
use crate::index::IndexDocument;
use crate::page::PageRequest;
use crate::retry::{with_backoff, RetryPolicy};
use crate::savepoint::{JobMode, SavePoint, SavePointService};
use crate::source::{RecordSource, SourceRecord};

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Init,
    Fetching,
    Processing,
    Writing,
    Checkpointing,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether a run may move from `self` to `next`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Init, Fetching)
            | (Fetching, Processing)
            | (Fetching, Done)
            | (Processing, Writing)
            | (Writing, Checkpointing)
            | (Checkpointing, Fetching)
            | (Checkpointing, Done) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Writing => "writing",
            Self::Checkpointing => "checkpointing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job_name: String,
    pub mode: JobMode,
    /// Pages committed in this run
    pub pages: usize,
    pub records_fetched: usize,
    pub documents_written: usize,
    pub records_skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_ids: Vec<String>,
    pub final_save_point: SavePoint,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub state: JobState,
}

impl RunReport {
    fn new(service: &SavePointService, save_point: SavePoint) -> Self {
        Self {
            run_id: service.run_id(),
            job_name: service.job_name().to_string(),
            mode: service.mode(),
            pages: 0,
            records_fetched: 0,
            documents_written: 0,
            records_skipped: 0,
            skipped_ids: Vec::new(),
            final_save_point: save_point,
            elapsed: Duration::ZERO,
            state: JobState::Init,
        }
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid job transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Job state change");
        self.state = next;
    }
}

/// One configured sync job
pub struct Job {
    save_points: SavePointService,
    source: Box<dyn RecordSource>,
    processor: Box<dyn JobProcessor>,
    writer: Box<dyn JobWriter>,
    page_size: u32,
    max_pages: Option<usize>,
    failure_policy: TransformFailurePolicy,
    retry: RetryPolicy,
}

impl Job {
    pub fn new(
        save_points: SavePointService,
        source: Box<dyn RecordSource>,
        processor: Box<dyn JobProcessor>,
        writer: Box<dyn JobWriter>,
    ) -> Self {
        Self {
            save_points,
            source,
            processor,
            writer,
            page_size: 500,
            max_pages: None,
            failure_policy: TransformFailurePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Stop after `max_pages` committed pages; `None` drains the source
    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages.filter(|n| *n > 0);
        self
    }

    pub fn with_failure_policy(mut self, policy: TransformFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn save_points(&self) -> &SavePointService {
        &self.save_points
    }

    /// Run until the source is drained or the page limit is reached
    pub async fn run(&mut self) -> Result<RunReport, SyncError> {
        let span = info_span!(
            "sync_run",
            job = %self.save_points.job_name(),
            run_id = %self.save_points.run_id()
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        info!(
            mode = %self.save_points.mode(),
            source = %self.source.describe(),
            page_size = self.page_size,
            "Starting sync run"
        );

        let save_point = self.save_points.load_save_point().await?;
        let mut report = RunReport::new(&self.save_points, save_point);

        match self.drain(&mut report).await {
            Ok(()) => {
                report.elapsed = started.elapsed();
                info!(
                    pages = report.pages,
                    records = report.records_fetched,
                    documents = report.documents_written,
                    skipped = report.records_skipped,
                    save_point = %report.final_save_point,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Sync run complete"
                );
                Ok(report)
            }
            Err(err) => {
                report.transition(JobState::Failed);
                warn!(
                    stage = %err.stage(),
                    pages = report.pages,
                    save_point = %report.final_save_point,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sync run failed: {err}"
                );
                Err(err)
            }
        }
    }

    async fn drain(&mut self, report: &mut RunReport) -> Result<(), SyncError> {
        let mode = self.save_points.mode();
        let mut save_point = report.final_save_point.clone();
        let start_offset = if mode.is_positional() {
            save_point.offset()
        } else {
            0
        };
        let mut page = PageRequest::new(start_offset, self.page_size).ok_or_else(|| {
            SyncError::configuration("page size must be greater than 0")
        })?;

        loop {
            if self.max_pages.is_some_and(|max| report.pages >= max) {
                debug!(pages = report.pages, "Page limit reached");
                break;
            }

            report.transition(JobState::Fetching);
            let records = with_backoff(&self.retry, "source fetch", || {
                self.source.fetch(&save_point, &page)
            })
            .await
            .map_err(|source| SyncError::SourceUnavailable { page, source })?;
            report.records_fetched += records.len();

            if records.is_empty() {
                debug!(%page, "Source drained");
                break;
            }

            let batch = self.save_points.define_batch(save_point.clone(), records)?;

            report.transition(JobState::Processing);
            let documents = self.process(batch.records(), report)?;

            report.transition(JobState::Writing);
            let written = self.write(&documents).await?;

            report.transition(JobState::Checkpointing);
            let consumed = batch.len();
            let (_, candidate) = batch.into_parts();
            self.save_points.save_save_point(&candidate, written).await?;
            if mode.is_positional() {
                page.advance(consumed);
            }

            report.pages += 1;
            report.documents_written += written;
            report.final_save_point = candidate.clone();
            save_point = candidate;
            info!(
                page = report.pages,
                records = consumed,
                documents = written,
                save_point = %save_point,
                "Committed page"
            );
        }

        report.transition(JobState::Done);
        Ok(())
    }

    fn process(
        &self,
        records: &[SourceRecord],
        report: &mut RunReport,
    ) -> Result<Vec<IndexDocument>, SyncError> {
        let mut documents = Vec::with_capacity(records.len());
        for record in records {
            match self.processor.process(record) {
                Ok(document) => documents.push(document),
                Err(err) if self.failure_policy == TransformFailurePolicy::Skip => {
                    warn!(record = %record.id, "Skipping record: {}", err.reason);
                    report.records_skipped += 1;
                    report.skipped_ids.push(record.id.clone());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(documents)
    }

    async fn write(&self, documents: &[IndexDocument]) -> Result<usize, SyncError> {
        if documents.is_empty() {
            return Ok(0);
        }
        with_backoff(&self.retry, "index write", || self.writer.write(documents))
            .await
            .map_err(|source| SyncError::Write {
                documents: documents.len(),
                source,
            })
    }
}
