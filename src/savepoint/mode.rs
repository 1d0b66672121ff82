//! Job modes and their progress-key strategies
//!
//! Each [`JobMode`] resolves to a static [`ModeStrategy`]: a table of plain
//! function pointers that produce the initial save point, compare two save
//! points, decide whether a record lies after a save point, order records, and
//! advance a save point over a committed batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::SavePoint;
use crate::source::{compare_ids, SourceRecord};

/// How a job measures and advances its progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Positional paging by offset over primary-key order
    #[default]
    Default,
    /// Keyset paging by last-modified timestamp, ties broken by id
    Timestamp,
    /// Keyset paging by last processed numeric identifier
    Legacy,
}

impl JobMode {
    pub const ALL: [JobMode; 3] = [JobMode::Default, JobMode::Timestamp, JobMode::Legacy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Timestamp => "timestamp",
            Self::Legacy => "legacy",
        }
    }

    /// Strategy table entry for this mode
    pub fn strategy(self) -> &'static ModeStrategy {
        &STRATEGIES[self as usize]
    }

    /// Save point a job starts from when nothing has been persisted
    pub fn initial_save_point(self) -> SavePoint {
        (self.strategy().initial)()
    }

    /// True when fetches position by page offset rather than by save point
    pub fn is_positional(self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" | "offset" => Ok(Self::Default),
            "timestamp" => Ok(Self::Timestamp),
            "legacy" | "identifier" => Ok(Self::Legacy),
            other => Err(format!("unknown job mode '{other}'")),
        }
    }
}

/// A record or save point that cannot be placed in the mode's ordering
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{mode} mode cannot use record '{record_id}': {reason}")]
pub struct ProgressKeyError {
    pub mode: JobMode,
    pub record_id: String,
    pub reason: String,
}

impl ProgressKeyError {
    fn new(mode: JobMode, record_id: &str, reason: impl Into<String>) -> Self {
        Self {
            mode,
            record_id: record_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Mode-specific functions selected at job construction
pub struct ModeStrategy {
    pub mode: JobMode,
    /// Save point for a job that has never committed
    pub initial: fn() -> SavePoint,
    /// Order two save points; `None` when either has the wrong shape
    pub compare: fn(&SavePoint, &SavePoint) -> Option<Ordering>,
    /// Whether a record lies strictly after the save point
    pub admits: fn(&SavePoint, &SourceRecord) -> bool,
    /// Fetch order of records
    pub order_records: fn(&SourceRecord, &SourceRecord) -> Ordering,
    /// Save point reached once `records` fetched from `origin` are committed
    pub advance: fn(&SavePoint, &[SourceRecord]) -> Result<SavePoint, ProgressKeyError>,
}

static STRATEGIES: [ModeStrategy; 3] = [
    ModeStrategy {
        mode: JobMode::Default,
        initial: offset_initial,
        compare: offset_compare,
        admits: offset_admits,
        order_records: offset_order,
        advance: offset_advance,
    },
    ModeStrategy {
        mode: JobMode::Timestamp,
        initial: timestamp_initial,
        compare: timestamp_compare,
        admits: timestamp_admits,
        order_records: timestamp_order,
        advance: timestamp_advance,
    },
    ModeStrategy {
        mode: JobMode::Legacy,
        initial: identifier_initial,
        compare: identifier_compare,
        admits: identifier_admits,
        order_records: identifier_order,
        advance: identifier_advance,
    },
];

fn offset_initial() -> SavePoint {
    SavePoint::Offset { offset: 0 }
}

fn offset_compare(a: &SavePoint, b: &SavePoint) -> Option<Ordering> {
    match (a, b) {
        (SavePoint::Offset { offset: x }, SavePoint::Offset { offset: y }) => Some(x.cmp(y)),
        _ => None,
    }
}

// Offset jobs are positioned by the page, not by record keys.
fn offset_admits(_: &SavePoint, _: &SourceRecord) -> bool {
    true
}

fn offset_order(a: &SourceRecord, b: &SourceRecord) -> Ordering {
    compare_ids(&a.id, &b.id)
}

fn offset_advance(origin: &SavePoint, records: &[SourceRecord]) -> Result<SavePoint, ProgressKeyError> {
    match origin {
        SavePoint::Offset { offset } => Ok(SavePoint::Offset {
            offset: offset + records.len() as u64,
        }),
        other => Err(shape_error(JobMode::Default, other)),
    }
}

fn timestamp_initial() -> SavePoint {
    SavePoint::Timestamp {
        timestamp: DateTime::<Utc>::UNIX_EPOCH,
        last_id: None,
    }
}

fn timestamp_key(save_point: &SavePoint) -> Option<(DateTime<Utc>, Option<&str>)> {
    match save_point {
        SavePoint::Timestamp { timestamp, last_id } => Some((*timestamp, last_id.as_deref())),
        _ => None,
    }
}

fn timestamp_compare(a: &SavePoint, b: &SavePoint) -> Option<Ordering> {
    let (ta, ia) = timestamp_key(a)?;
    let (tb, ib) = timestamp_key(b)?;
    Some(ta.cmp(&tb).then_with(|| cmp_tie_ids(ia, ib)))
}

// None sorts before every id so a bare timestamp admits all records at that instant.
fn cmp_tie_ids(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.as_bytes().cmp(y.as_bytes()),
        (x, y) => x.is_some().cmp(&y.is_some()),
    }
}

// Records without a timestamp are always admitted so that `advance` reports them.
fn timestamp_admits(save_point: &SavePoint, record: &SourceRecord) -> bool {
    let Some((ts, last_id)) = timestamp_key(save_point) else {
        return false;
    };
    let Some(updated_at) = record.updated_at else {
        return true;
    };
    updated_at
        .cmp(&ts)
        .then_with(|| cmp_tie_ids(Some(&record.id), last_id))
        == Ordering::Greater
}

fn timestamp_order(a: &SourceRecord, b: &SourceRecord) -> Ordering {
    a.updated_at
        .cmp(&b.updated_at)
        .then_with(|| a.id.as_bytes().cmp(b.id.as_bytes()))
}

fn timestamp_advance(
    origin: &SavePoint,
    records: &[SourceRecord],
) -> Result<SavePoint, ProgressKeyError> {
    if timestamp_key(origin).is_none() {
        return Err(shape_error(JobMode::Timestamp, origin));
    }
    let mut best = origin.clone();
    for record in records {
        let updated_at = record.updated_at.ok_or_else(|| {
            ProgressKeyError::new(JobMode::Timestamp, &record.id, "missing updated_at")
        })?;
        let candidate = SavePoint::Timestamp {
            timestamp: updated_at,
            last_id: Some(record.id.clone()),
        };
        if timestamp_compare(&candidate, &best) == Some(Ordering::Greater) {
            best = candidate;
        }
    }
    Ok(best)
}

fn identifier_initial() -> SavePoint {
    SavePoint::Identifier { last_id: None }
}

fn identifier_compare(a: &SavePoint, b: &SavePoint) -> Option<Ordering> {
    match (a, b) {
        (SavePoint::Identifier { last_id: x }, SavePoint::Identifier { last_id: y }) => {
            Some(x.cmp(y))
        }
        _ => None,
    }
}

fn identifier_admits(save_point: &SavePoint, record: &SourceRecord) -> bool {
    match (save_point, record.numeric_id()) {
        (SavePoint::Identifier { last_id }, Some(id)) => Some(id) > *last_id,
        (SavePoint::Identifier { .. }, None) => true,
        _ => false,
    }
}

fn identifier_order(a: &SourceRecord, b: &SourceRecord) -> Ordering {
    a.numeric_id().cmp(&b.numeric_id())
}

fn identifier_advance(
    origin: &SavePoint,
    records: &[SourceRecord],
) -> Result<SavePoint, ProgressKeyError> {
    let SavePoint::Identifier { last_id } = origin else {
        return Err(shape_error(JobMode::Legacy, origin));
    };
    let mut best = *last_id;
    for record in records {
        let id = record.numeric_id().ok_or_else(|| {
            ProgressKeyError::new(JobMode::Legacy, &record.id, "id is not an integer")
        })?;
        best = best.max(Some(id));
    }
    Ok(SavePoint::Identifier { last_id: best })
}

fn shape_error(mode: JobMode, found: &SavePoint) -> ProgressKeyError {
    ProgressKeyError::new(
        mode,
        "",
        format!("save point {found} belongs to {} mode", found.mode()),
    )
}
