use crate::progress::ImportProgress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The single active import. Persisted under `import:job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportJob {
    /// Durable copy owned by the engine; deleted on cancel or supersede.
    pub source_file_path: PathBuf,
    pub original_filename: String,
    pub content_hash: String,
    pub total_records: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Where the next slice should start.
    pub next_offset: u64,
}

impl ImportJob {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Same file as the job's, however the caller spelled the path.
    pub fn owns(&self, file: &Path) -> bool {
        if self.source_file_path == file {
            return true;
        }
        match (self.source_file_path.canonicalize(), file.canonicalize()) {
            (Ok(ours), Ok(theirs)) => ours == theirs,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartStatus {
    Started,
    Resumed,
}

impl StartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartStatus::Started => "started",
            StartStatus::Resumed => "resumed",
        }
    }
}

/// Returned by `start` and `resume`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub status: StartStatus,
    pub total: u64,
    /// Job file to pass to `process_slice`.
    pub file: PathBuf,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub next_offset: u64,
}

impl StartOutcome {
    pub(crate) fn new(status: StartStatus, job: &ImportJob, progress: &ImportProgress) -> Self {
        Self {
            status,
            total: job.total_records,
            file: job.source_file_path.clone(),
            processed: progress.processed,
            succeeded: progress.succeeded,
            failed: progress.failed,
            next_offset: job.next_offset,
        }
    }
}

/// Result of one `process_slice` call. Counters are job-cumulative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceReport {
    pub processed: u64,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub next_offset: u64,
    pub is_complete: bool,
    /// Rows read from the file by this call, skipped ones included.
    pub rows_in_slice: u64,
    /// Rows already in the ledger.
    pub skipped: u64,
}

impl SliceReport {
    pub fn progress(&self) -> ImportProgress {
        ImportProgress {
            total: self.total,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    NoJob,
    Started,
    Processing,
    Completed,
}

impl JobState {
    pub fn of(job: Option<&ImportJob>) -> Self {
        match job {
            None => JobState::NoJob,
            Some(job) if job.is_complete() => JobState::Completed,
            Some(job) if job.next_offset == 0 => JobState::Started,
            Some(_) => JobState::Processing,
        }
    }
}
