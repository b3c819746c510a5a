//! Read-only views for a polling client.

use crate::error::Result;
use crate::feed::{FeedSyncEngine, FeedSyncState};
use crate::import::{ImportEngine, ImportJob, JobState};
use crate::logging::LogTail;
use crate::progress::ImportProgress;
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time view of both engines. Every field comes from a single
/// stored value, so counters are never seen half-updated.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub progress: ImportProgress,
    pub job: Option<ImportJob>,
    pub job_state: JobState,
    pub feed: FeedSyncState,
}

pub struct StatusBoard {
    import: Arc<ImportEngine>,
    feed: Arc<FeedSyncEngine>,
    logs: LogTail,
    recent_lines: usize,
}

impl StatusBoard {
    pub fn new(
        import: Arc<ImportEngine>,
        feed: Arc<FeedSyncEngine>,
        logs: LogTail,
        recent_lines: usize,
    ) -> Self {
        Self {
            import,
            feed,
            logs,
            recent_lines,
        }
    }

    pub fn progress(&self) -> Result<ImportProgress> {
        self.import.progress()
    }

    pub fn snapshot(&self) -> Result<StatusSnapshot> {
        let job = self.import.current_job()?;
        Ok(StatusSnapshot {
            progress: self.import.progress()?,
            job_state: JobState::of(job.as_ref()),
            job,
            feed: self.feed.state()?,
        })
    }

    /// The configured number of most recent log lines, oldest first.
    pub fn recent_logs(&self) -> Result<Vec<String>> {
        self.recent_logs_n(self.recent_lines)
    }

    pub fn recent_logs_n(&self, max_lines: usize) -> Result<Vec<String>> {
        Ok(self.logs.recent(max_lines)?)
    }

    pub fn clear_logs(&self) -> Result<()> {
        Ok(self.logs.clear()?)
    }

    pub fn log_size(&self) -> Result<String> {
        Ok(self.logs.size_human()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::feed::{FeedEntry, FeedFetcher};
    use crate::media::{MediaError, MediaResolver};
    use crate::sink::{MediaId, NormalizedRecord, RecordId, RecordSink, SinkError};
    use crate::state::StateHandle;
    use std::fs;
    use tempfile::TempDir;

    struct Null;

    impl RecordSink for Null {
        fn submit(&self, _: &NormalizedRecord) -> std::result::Result<RecordId, SinkError> {
            Ok(RecordId(1))
        }
    }

    impl MediaResolver for Null {
        fn resolve(&self, url: &str) -> std::result::Result<MediaId, MediaError> {
            Err(MediaError::Fetch {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    impl FeedFetcher for Null {
        fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
            Err(Error::FeedUnreachable {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn board(dir: &TempDir) -> StatusBoard {
        let state = StateHandle::in_memory();
        let null = Arc::new(Null);
        let import = ImportEngine::new(state.clone(), null.clone(), null.clone(), dir.path());
        let feed = FeedSyncEngine::new(state, null.clone(), null.clone(), null);
        StatusBoard::new(
            Arc::new(import),
            Arc::new(feed),
            LogTail::new(dir.path().join("importer.log")),
            2,
        )
    }

    #[test]
    fn test_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let snapshot = board(&dir).snapshot().unwrap();
        assert_eq!(snapshot.progress, ImportProgress::default());
        assert_eq!(snapshot.job_state, JobState::NoJob);
        assert!(snapshot.job.is_none());
        assert_eq!(snapshot.feed.feed_url, None);
    }

    #[test]
    fn test_recent_logs_uses_configured_count() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("importer.log"), "one\ntwo\nthree\n").unwrap();
        let board = board(&dir);
        assert_eq!(board.recent_logs().unwrap(), vec!["two", "three"]);
        board.clear_logs().unwrap();
        assert!(board.recent_logs().unwrap().is_empty());
        assert_eq!(board.log_size().unwrap(), "0.00 B");
    }
}
