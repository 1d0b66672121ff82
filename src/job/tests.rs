use super::*;
use crate::index::{IndexError, MemorySearchIndex};
use crate::source::MemorySource;
use crate::storage::{MemoryBackend, SavePointContainer, SavePointContainerService, SAVEPOINT_FORMAT_VERSION};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

const JOB: &str = "orders";

fn fields(id: &str) -> Map<String, Value> {
    match json!({ "id": id, "name": format!("record {id}") }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn numbered(count: usize) -> Vec<SourceRecord> {
    (1..=count)
        .map(|i| {
            let id = i.to_string();
            SourceRecord::new(id.clone(), fields(&id))
        })
        .collect()
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn stamped(id: &str, secs: i64) -> SourceRecord {
    SourceRecord::new(id, fields(id)).with_updated_at(at(secs))
}

/// Returns the same page on every fetch
struct FixedPage(Vec<SourceRecord>);

#[async_trait::async_trait]
impl RecordSource for FixedPage {
    async fn fetch(
        &self,
        _save_point: &SavePoint,
        _page: &PageRequest,
    ) -> Result<Vec<SourceRecord>, crate::source::SourceError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

struct RejectIds(Vec<&'static str>);

impl JobProcessor for RejectIds {
    fn process(&self, record: &SourceRecord) -> Result<IndexDocument, TransformError> {
        if self.0.contains(&record.id.as_str()) {
            return Err(TransformError::new(&record.id, "rejected by test"));
        }
        DocumentProcessor::new().process(record)
    }
}

struct Harness {
    mode: JobMode,
    store: MemoryBackend,
    source: MemorySource,
    index: MemorySearchIndex,
}

impl Harness {
    fn new(mode: JobMode, records: Vec<SourceRecord>) -> Self {
        Self {
            mode,
            store: MemoryBackend::new(),
            source: MemorySource::new(mode, records),
            index: MemorySearchIndex::new("orders-v1"),
        }
    }

    fn job(&self, page_size: u32) -> Job {
        self.job_with(page_size, Box::new(DocumentProcessor::new()))
    }

    fn job_with(&self, page_size: u32, processor: Box<dyn JobProcessor>) -> Job {
        let save_points = SavePointService::new(Arc::new(self.store.clone()), JOB, self.mode);
        Job::new(
            save_points,
            Box::new(self.source.clone()),
            processor,
            Box::new(IndexWriter::new(Arc::new(self.index.clone()))),
        )
        .with_page_size(page_size)
        .with_retry(RetryPolicy::none())
    }

    async fn saved(&self) -> Option<SavePoint> {
        self.store.get(JOB, self.mode).await.map(|c| c.save_point)
    }
}

#[test]
fn test_state_transitions() {
    use JobState::*;
    assert!(Init.can_transition_to(Fetching));
    assert!(Fetching.can_transition_to(Done));
    assert!(Checkpointing.can_transition_to(Fetching));
    assert!(Writing.can_transition_to(Failed));
    assert!(!Fetching.can_transition_to(Writing));
    assert!(!Writing.can_transition_to(Fetching));
    assert!(!Done.can_transition_to(Failed));
    assert!(!Failed.can_transition_to(Init));
}

#[tokio::test]
async fn test_run_drains_source_in_pages() {
    let h = Harness::new(JobMode::Default, numbered(5));
    let report = h.job(2).run().await.unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(report.pages, 3);
    assert_eq!(report.records_fetched, 5);
    assert_eq!(report.documents_written, 5);
    assert_eq!(report.final_save_point, SavePoint::Offset { offset: 5 });
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 5 }));
    assert_eq!(h.index.len().await, 5);
    // three non-empty pages plus the empty one that ends the run
    assert_eq!(h.source.fetch_count(), 4);
}

#[tokio::test]
async fn test_termination_on_exact_multiple_of_page_size() {
    let h = Harness::new(JobMode::Default, numbered(4));
    let report = h.job(2).run().await.unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(h.source.fetch_count(), 3);
    assert_eq!(h.index.bulk_calls(), 2);
}

#[tokio::test]
async fn test_first_run_on_empty_source_creates_initial_container() {
    for mode in JobMode::ALL {
        let h = Harness::new(mode, Vec::new());
        let report = h.job(10).run().await.unwrap();

        assert_eq!(report.pages, 0);
        assert_eq!(report.final_save_point, mode.initial_save_point());
        assert_eq!(h.source.fetch_count(), 1);
        assert_eq!(h.index.bulk_calls(), 0);

        let container = h.store.get(JOB, mode).await.unwrap();
        assert_eq!(container.save_point, mode.initial_save_point());
        assert_eq!(container.records_indexed, 0);
        assert_eq!(container.version, SAVEPOINT_FORMAT_VERSION);
    }
}

#[tokio::test]
async fn test_failed_container_creation_is_storage_unavailable() {
    let h = Harness::new(JobMode::Timestamp, numbered(2));
    h.store.set_fail_writes(true);

    let err = h.job(2).run().await.unwrap_err();
    assert!(matches!(err, SyncError::StorageUnavailable { .. }));
    assert_eq!(err.stage(), JobState::Init);
    assert_eq!(h.source.fetch_count(), 0);
    assert!(h.saved().await.is_none());
}

#[tokio::test]
async fn test_second_run_after_drain_is_a_no_op() {
    let h = Harness::new(JobMode::Default, numbered(3));
    h.job(2).run().await.unwrap();
    let snapshot = h.index.snapshot().await;

    let report = h.job(2).run().await.unwrap();
    assert_eq!(report.pages, 0);
    assert_eq!(report.final_save_point, SavePoint::Offset { offset: 3 });
    assert_eq!(h.index.snapshot().await, snapshot);
}

#[tokio::test]
async fn test_new_records_are_picked_up_by_next_run() {
    let h = Harness::new(JobMode::Default, numbered(2));
    h.job(2).run().await.unwrap();

    h.source.upsert(SourceRecord::new("3", fields("3"))).await;
    let report = h.job(2).run().await.unwrap();

    assert_eq!(report.pages, 1);
    assert_eq!(report.documents_written, 1);
    assert!(h.index.get("3").await.is_some());
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 3 }));
}

#[tokio::test]
async fn test_replay_from_scratch_is_idempotent() {
    let h = Harness::new(JobMode::Default, numbered(5));
    h.job(2).run().await.unwrap();
    let once = h.index.snapshot().await;

    let mut job = h.job(2);
    job.save_points.reset().await.unwrap();
    let report = job.run().await.unwrap();

    assert_eq!(report.documents_written, 5);
    assert_eq!(h.index.snapshot().await, once);
}

#[tokio::test]
async fn test_write_failure_on_second_page_keeps_first_checkpoint() {
    let h = Harness::new(JobMode::Default, numbered(6));
    h.index.fail_on_bulk_call(2);

    let err = h.job(2).run().await.unwrap_err();
    assert!(matches!(err, SyncError::Write { documents: 2, .. }));
    assert_eq!(err.stage(), JobState::Writing);
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 2 }));
    assert_eq!(h.index.len().await, 2);

    let bulk_before = h.index.bulk_calls();
    let report = h.job(2).run().await.unwrap();
    // only pages two and three are delivered again
    assert_eq!(report.pages, 2);
    assert_eq!(h.index.bulk_calls() - bulk_before, 2);
    assert_eq!(h.index.len().await, 6);
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 6 }));
}

#[tokio::test]
async fn test_crash_between_write_and_checkpoint_loses_nothing() {
    let h = Harness::new(JobMode::Default, numbered(4));
    let mut job = h.job(2);
    job.save_points.load_save_point().await.unwrap();
    h.store.set_fail_writes(true);

    let err = job.run().await.unwrap_err();
    match &err {
        SyncError::CheckpointPersist { last_durable, .. } => {
            assert_eq!(last_durable, "offset 0");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), JobState::Checkpointing);
    // the batch reached the index even though the checkpoint did not
    assert_eq!(h.index.len().await, 2);
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 0 }));

    h.store.set_fail_writes(false);
    let report = h.job(2).run().await.unwrap();
    assert_eq!(report.documents_written, 4);
    assert_eq!(h.index.len().await, 4);
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 4 }));
}

#[tokio::test]
async fn test_storage_unavailable_fails_before_fetching() {
    let h = Harness::new(JobMode::Default, numbered(3));
    h.store.set_fail_reads(true);

    let err = h.job(2).run().await.unwrap_err();
    assert!(matches!(err, SyncError::StorageUnavailable { .. }));
    assert_eq!(err.stage(), JobState::Init);
    assert_eq!(h.source.fetch_count(), 0);
    assert_eq!(h.index.bulk_calls(), 0);
}

#[tokio::test]
async fn test_source_unavailable_fails_without_advancing() {
    let h = Harness::new(JobMode::Default, numbered(3));
    h.source.set_unavailable(true);

    let err = h.job(2).run().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    assert!(err.is_retryable_next_run());
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 0 }));
}

#[tokio::test]
async fn test_transform_failure_aborts_by_default() {
    let h = Harness::new(JobMode::Default, numbered(4));
    let err = h
        .job_with(2, Box::new(RejectIds(vec!["3"])))
        .run()
        .await
        .unwrap_err();

    match &err {
        SyncError::Transform(e) => assert_eq!(e.record_id, "3"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), JobState::Processing);
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 2 }));
    assert_eq!(h.index.len().await, 2);
}

#[tokio::test]
async fn test_transform_failure_skip_policy_commits_rest_of_page() {
    let h = Harness::new(JobMode::Default, numbered(4));
    let report = h
        .job_with(2, Box::new(RejectIds(vec!["3"])))
        .with_failure_policy(TransformFailurePolicy::Skip)
        .run()
        .await
        .unwrap();

    assert_eq!(report.records_skipped, 1);
    assert_eq!(report.skipped_ids, vec!["3".to_string()]);
    assert_eq!(report.documents_written, 3);
    assert!(h.index.get("3").await.is_none());
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 4 }));
}

#[tokio::test]
async fn test_page_of_only_skipped_records_still_checkpoints() {
    let h = Harness::new(JobMode::Default, numbered(2));
    let report = h
        .job_with(2, Box::new(RejectIds(vec!["1", "2"])))
        .with_failure_policy(TransformFailurePolicy::Skip)
        .run()
        .await
        .unwrap();

    assert_eq!(report.pages, 1);
    assert_eq!(report.documents_written, 0);
    assert_eq!(h.index.bulk_calls(), 0);
    assert_eq!(h.saved().await, Some(SavePoint::Offset { offset: 2 }));
}

#[tokio::test]
async fn test_timestamp_mode_one_page_per_run() {
    let h = Harness::new(
        JobMode::Timestamp,
        vec![stamped("1", 10), stamped("2", 20), stamped("3", 30)],
    );
    let mut initial = SavePointContainer::initial(JOB, JobMode::Timestamp);
    initial.save_point = SavePoint::Timestamp {
        timestamp: at(0),
        last_id: None,
    };
    h.store.save(&initial).await.unwrap();

    let first = h.job(2).with_max_pages(Some(1)).run().await.unwrap();
    assert_eq!(first.pages, 1);
    assert_eq!(
        first.final_save_point,
        SavePoint::Timestamp {
            timestamp: at(20),
            last_id: Some("2".to_string())
        }
    );

    let second = h.job(2).with_max_pages(Some(1)).run().await.unwrap();
    assert_eq!(second.records_fetched, 1);
    assert_eq!(
        h.saved().await,
        Some(SavePoint::Timestamp {
            timestamp: at(30),
            last_id: Some("3".to_string())
        })
    );

    let third = h.job(2).with_max_pages(Some(1)).run().await.unwrap();
    assert_eq!(third.state, JobState::Done);
    assert_eq!(third.pages, 0);
    assert_eq!(third.documents_written, 0);
    assert_eq!(h.index.len().await, 3);
}

#[tokio::test]
async fn test_timestamp_ties_span_pages_without_loss() {
    let records = (1..=5).map(|i| stamped(&i.to_string(), 42)).collect();
    let h = Harness::new(JobMode::Timestamp, records);

    let report = h.job(2).run().await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.records_fetched, 5);
    assert_eq!(h.index.len().await, 5);
    assert_eq!(
        h.saved().await,
        Some(SavePoint::Timestamp {
            timestamp: at(42),
            last_id: Some("5".to_string())
        })
    );
}

#[tokio::test]
async fn test_timestamp_mode_sees_updates_to_earlier_rows() {
    let h = Harness::new(JobMode::Timestamp, vec![stamped("1", 10), stamped("2", 20)]);
    h.job(10).run().await.unwrap();

    h.source.upsert(stamped("1", 50)).await;
    let report = h.job(10).run().await.unwrap();

    assert_eq!(report.documents_written, 1);
    assert_eq!(
        h.saved().await,
        Some(SavePoint::Timestamp {
            timestamp: at(50),
            last_id: Some("1".to_string())
        })
    );
}

#[tokio::test]
async fn test_timestamp_record_without_timestamp_fails() {
    let h = Harness::new(JobMode::Timestamp, Vec::new());
    let save_points = SavePointService::new(Arc::new(h.store.clone()), JOB, JobMode::Timestamp);
    let mut job = Job::new(
        save_points,
        Box::new(FixedPage(vec![SourceRecord::new("1", fields("1"))])),
        Box::new(DocumentProcessor::new()),
        Box::new(IndexWriter::new(Arc::new(h.index.clone()))),
    )
    .with_retry(RetryPolicy::none());

    let err = job.run().await.unwrap_err();
    assert!(matches!(err, SyncError::ProgressKey(_)));
    assert_eq!(err.stage(), JobState::Fetching);
    assert_eq!(h.index.bulk_calls(), 0);
    assert_eq!(h.saved().await, Some(JobMode::Timestamp.initial_save_point()));
}

#[tokio::test]
async fn test_keyless_record_in_source_fails_run() {
    let h = Harness::new(
        JobMode::Timestamp,
        vec![
            stamped("1", 10),
            SourceRecord::new("2", fields("2")),
            stamped("3", 20),
        ],
    );
    let err = h.job(10).run().await.unwrap_err();
    assert!(matches!(err, SyncError::ProgressKey(_)));
    assert_eq!(h.index.bulk_calls(), 0);

    let h = Harness::new(
        JobMode::Legacy,
        vec![
            SourceRecord::new("1", fields("1")),
            SourceRecord::new("sku-2", fields("sku-2")),
        ],
    );
    let err = h.job(10).run().await.unwrap_err();
    assert!(matches!(err, SyncError::ProgressKey(_)));
    assert_eq!(h.saved().await, Some(SavePoint::Identifier { last_id: None }));
}

#[tokio::test]
async fn test_legacy_mode_resumes_after_last_id() {
    let h = Harness::new(JobMode::Legacy, numbered(5));

    h.job(2).with_max_pages(Some(1)).run().await.unwrap();
    assert_eq!(h.saved().await, Some(SavePoint::Identifier { last_id: Some(2) }));

    let report = h.job(2).run().await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(h.saved().await, Some(SavePoint::Identifier { last_id: Some(5) }));
    assert_eq!(h.index.len().await, 5);
}

#[tokio::test]
async fn test_checkpoints_are_monotonic_across_runs() {
    let h = Harness::new(JobMode::Legacy, numbered(7));
    let mut seen: Vec<SavePoint> = Vec::new();

    for _ in 0..5 {
        h.job(2).with_max_pages(Some(1)).run().await.unwrap();
        if let Some(current) = h.saved().await {
            if let Some(previous) = seen.last() {
                assert_ne!(current.compare(previous), Some(std::cmp::Ordering::Less));
            }
            seen.push(current);
        }
    }
    assert_eq!(seen.last(), Some(&SavePoint::Identifier { last_id: Some(7) }));
}

#[tokio::test]
async fn test_run_report_serializes_for_cli_output() {
    let h = Harness::new(JobMode::Default, numbered(1));
    let report = h.job(5).run().await.unwrap();

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["job_name"], JOB);
    assert_eq!(value["state"], "done");
    assert_eq!(value["final_save_point"]["kind"], "offset");
    assert!(value.get("skipped_ids").is_none());
}

#[tokio::test]
async fn test_newer_save_point_format_is_rejected() {
    let h = Harness::new(JobMode::Default, numbered(1));
    let mut container = SavePointContainer::initial(JOB, JobMode::Default);
    container.version = SAVEPOINT_FORMAT_VERSION + 1;
    h.store.save(&container).await.unwrap();

    let err = h.job(5).run().await.unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
    assert_eq!(h.source.fetch_count(), 0);
}

#[tokio::test]
async fn test_permanent_index_error_is_not_retried() {
    let h = Harness::new(JobMode::Default, numbered(2));
    h.index.fail_on_bulk_call(1);

    let err = h
        .job(2)
        .with_retry(RetryPolicy {
            max_retries: 3,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(1),
            backoff_multiplier: 1.0,
        })
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Write {
            source: IndexError::Rejected { .. },
            ..
        }
    ));
    assert_eq!(h.index.bulk_calls(), 1);
}
