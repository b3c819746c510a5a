use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOrigin {
    CsvImport,
    FeedSync,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::CsvImport => "csv_import",
            RecordOrigin::FeedSync => "feed_sync",
        }
    }
}

/// A source row or feed entry in the shape the destination accepts.
/// Built per call and never persisted by the engines themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub origin: RecordOrigin,
    pub fingerprint: String,
    pub raw_fields: Vec<String>,
    pub content: String,
    pub media_urls: Vec<String>,
    /// Media resolved from `media_urls`; may be shorter when some failed.
    pub media: Vec<MediaId>,
    /// `None` when the source had no usable timestamp.
    pub recorded_at: Option<DateTime<Utc>>,
    pub source_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    Rejected(String),
    Unavailable(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Rejected(reason) => write!(f, "record rejected: {}", reason),
            SinkError::Unavailable(reason) => write!(f, "destination unavailable: {}", reason),
        }
    }
}

impl std::error::Error for SinkError {}

/// Destination for normalized records.
pub trait RecordSink: Send + Sync {
    fn submit(&self, record: &NormalizedRecord) -> Result<RecordId, SinkError>;
}
