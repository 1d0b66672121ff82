//! Record to document transformation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::index::IndexDocument;
use crate::source::SourceRecord;

/// A record that could not be turned into a document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record '{record_id}': {reason}")]
pub struct TransformError {
    pub record_id: String,
    pub reason: String,
}

impl TransformError {
    pub fn new(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }
}

/// What a run does when one record fails to transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformFailurePolicy {
    /// Fail the run; the save point stays before the page
    #[default]
    Abort,
    /// Leave the record out, report its id, and commit the rest of the page
    Skip,
}

/// Pure one-to-one mapping from a source record to an index document
pub trait JobProcessor: Send + Sync {
    fn process(&self, record: &SourceRecord) -> Result<IndexDocument, TransformError>;
}

/// Copies row columns into the document body
///
/// The document id is the record id, so replays overwrite instead of
/// duplicating.
#[derive(Debug, Clone, Default)]
pub struct DocumentProcessor {
    fields: Option<Vec<String>>,
    drop_nulls: bool,
}

impl DocumentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only these columns
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_drop_nulls(mut self, drop_nulls: bool) -> Self {
        self.drop_nulls = drop_nulls;
        self
    }
}

impl JobProcessor for DocumentProcessor {
    fn process(&self, record: &SourceRecord) -> Result<IndexDocument, TransformError> {
        if record.id.is_empty() {
            return Err(TransformError::new("", "record has an empty id"));
        }

        let mut body = match &self.fields {
            Some(fields) => {
                let mut projected = Map::with_capacity(fields.len());
                for field in fields {
                    let value = record.fields.get(field).ok_or_else(|| {
                        TransformError::new(&record.id, format!("missing column '{field}'"))
                    })?;
                    projected.insert(field.clone(), value.clone());
                }
                projected
            }
            None => record.fields.clone(),
        };

        if self.drop_nulls {
            body.retain(|_, value| !value.is_null());
        }

        Ok(IndexDocument::new(record.id.clone(), Value::Object(body)))
    }
}
