use serde::{Deserialize, Serialize};

/// Counters for the current import job.
///
/// `processed == succeeded + failed` and `processed <= total` hold in every
/// persisted value; `total` is fixed when the job starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ImportProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
        self.processed += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.processed += 1;
    }

    pub fn is_consistent(&self) -> bool {
        self.processed == self.succeeded + self.failed && self.processed <= self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }
}

/// Trait for reporting import and sync progress.
///
/// The CLI implements it with indicatif bars; library callers that do not
/// care use [`SilentReporter`]. All methods default to no-ops.
pub trait ProgressReporter: Send + Sync {
    fn on_import_start(&self, _total: u64, _processed: u64) {}
    fn on_slice_complete(&self, _progress: &ImportProgress, _next_offset: u64) {}
    fn on_import_complete(&self, _progress: &ImportProgress, _duration_secs: f64) {}
    fn on_sync_start(&self, _feed_url: &str) {}
    fn on_sync_entry(&self, _index: usize, _entries: usize, _imported: bool) {}
    fn on_sync_complete(&self, _imported: usize, _entries: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
