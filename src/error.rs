use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("source file {path} is unreadable: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("durable storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("import file {0} no longer exists")]
    SourceMissing(PathBuf),

    #[error("offset {offset} is past the end of the job ({total} records)")]
    InvalidOffset { offset: u64, total: u64 },

    #[error("no import job is active")]
    NoActiveJob,

    #[error("{0} is not the active import file")]
    JobMismatch(PathBuf),

    #[error("no source file supplied and no unfinished import to resume")]
    NoSourceSupplied,

    #[error("persisted state is corrupt: {0}")]
    StateCorruption(String),

    #[error("feed URL is not configured")]
    FeedUnconfigured,

    #[error("feed sync is disabled")]
    FeedDisabled,

    #[error("invalid feed URL {url}: {reason}")]
    InvalidFeedUrl { url: String, reason: String },

    #[error("feed {url} unreachable: {reason}")]
    FeedUnreachable { url: String, reason: String },

    #[error("feed {url} is malformed: {reason}")]
    FeedMalformed { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("State store error: {0}")]
    Store(#[from] rocksdb::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Error taxonomy callers react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad caller input. Surfaced immediately, never retried.
    InputInvalid,
    /// Network or fetch failure. Per-item failures of this class are skipped.
    TransientResource,
    /// Persisted state no longer matches reality; cancel and restart.
    StateCorruption,
    /// Destination refused a record. Only ever counted per item.
    SinkRejected,
    Internal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::SourceUnreadable { .. }
            | Error::InvalidOffset { .. }
            | Error::NoActiveJob
            | Error::JobMismatch(_)
            | Error::NoSourceSupplied
            | Error::FeedUnconfigured
            | Error::FeedDisabled
            | Error::InvalidFeedUrl { .. }
            | Error::Config(_) => ErrorClass::InputInvalid,
            Error::FeedUnreachable { .. } | Error::FeedMalformed { .. } => {
                ErrorClass::TransientResource
            }
            Error::SourceMissing(_) | Error::StateCorruption(_) | Error::Codec(_) => {
                ErrorClass::StateCorruption
            }
            Error::StorageUnavailable(_)
            | Error::Io(_)
            | Error::Database(_)
            | Error::Store(_) => ErrorClass::Internal,
        }
    }

    /// Short message for the person driving the import. No internals.
    pub fn user_message(&self) -> String {
        match self {
            Error::SourceUnreadable { path, .. } => {
                format!("Cannot read {}", display_name(path))
            }
            Error::StorageUnavailable(_) => "Could not save the import file".to_string(),
            Error::SourceMissing(_) => {
                "The import file is gone, cancel and upload it again".to_string()
            }
            Error::InvalidOffset { .. } => "Invalid import position".to_string(),
            Error::NoActiveJob => "No import in progress".to_string(),
            Error::JobMismatch(_) => "That file is not the current import".to_string(),
            Error::NoSourceSupplied => "Please choose a CSV file".to_string(),
            Error::StateCorruption(_) | Error::Codec(_) => {
                "Import state is damaged, cancel and start again".to_string()
            }
            Error::FeedUnconfigured => "Feed URL is not set".to_string(),
            Error::FeedDisabled => "Feed sync is disabled".to_string(),
            Error::InvalidFeedUrl { .. } => "Please enter a valid http(s) feed URL".to_string(),
            Error::FeedUnreachable { .. } => "Could not reach the feed".to_string(),
            Error::FeedMalformed { .. } => "The feed could not be read".to_string(),
            Error::Config(_) => "Configuration is invalid".to_string(),
            Error::Io(_) | Error::Database(_) | Error::Store(_) => {
                "Internal storage error".to_string()
            }
        }
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
