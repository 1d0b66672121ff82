//! Run-level error taxonomy
//!
//! Every stage failure aborts the run without advancing the save point.
//! Callers match on the variant to tell "rerun later" apart from "fix the
//! data or configuration first".

use thiserror::Error;

use crate::index::IndexError;
use crate::job::{JobState, TransformError};
use crate::page::PageRequest;
use crate::savepoint::ProgressKeyError;
use crate::source::SourceError;
use crate::storage::StorageError;

/// Result type for sync runs
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Save-point store unreachable; no checkpoint was changed
    #[error("save-point store unavailable for job '{job}': {source}")]
    StorageUnavailable {
        job: String,
        #[source]
        source: StorageError,
    },

    /// Fetching a page failed; the same page is fetched again next run
    #[error("source fetch failed at {page}: {source}")]
    SourceUnavailable {
        page: PageRequest,
        #[source]
        source: SourceError,
    },

    /// A record could not be converted into a document
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    /// The index rejected or did not receive the batch
    #[error("index write failed for {documents} documents: {source}")]
    Write {
        documents: usize,
        #[source]
        source: IndexError,
    },

    /// Documents were written but the save point could not be persisted
    #[error("documents indexed but save point not persisted; next run replays from {last_durable}: {source}")]
    CheckpointPersist {
        last_durable: String,
        #[source]
        source: StorageError,
    },

    /// A fetched record has no usable progress key for the job mode
    #[error("{0}")]
    ProgressKey(#[from] ProgressKeyError),

    /// A candidate save point orders before the one already committed
    #[error("save point for job '{job}' would move backwards from {previous} to {candidate}")]
    SavePointRegression {
        job: String,
        previous: String,
        candidate: String,
    },

    /// Invalid or inconsistent configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Stage the run was in when this error occurred
    pub fn stage(&self) -> JobState {
        match self {
            Self::StorageUnavailable { .. } | Self::Configuration(_) => JobState::Init,
            Self::SourceUnavailable { .. } | Self::ProgressKey(_) => JobState::Fetching,
            Self::Transform(_) => JobState::Processing,
            Self::Write { .. } => JobState::Writing,
            Self::CheckpointPersist { .. } | Self::SavePointRegression { .. } => {
                JobState::Checkpointing
            }
        }
    }

    /// Whether simply running again later is expected to make progress
    pub fn is_retryable_next_run(&self) -> bool {
        match self {
            Self::StorageUnavailable { .. }
            | Self::SourceUnavailable { .. }
            | Self::CheckpointPersist { .. } => true,
            Self::Write { source, .. } => source.is_retryable(),
            Self::Transform(_)
            | Self::ProgressKey(_)
            | Self::SavePointRegression { .. }
            | Self::Configuration(_) => false,
        }
    }

    /// Process exit status reported by the binary
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::StorageUnavailable { .. } => 3,
            Self::SourceUnavailable { .. } => 4,
            Self::Transform(_) => 5,
            Self::Write { .. } => 6,
            Self::CheckpointPersist { .. } => 7,
            Self::ProgressKey(_) => 8,
            Self::SavePointRegression { .. } => 9,
        }
    }
}
