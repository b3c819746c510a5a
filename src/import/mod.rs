//! Resumable, time-boxed CSV import.
//!
//! `start` takes ownership of an export file, then callers pull slices with
//! `process_slice` (or an [`ImportCursor`]) until one reports completion.
//! Everything a slice changes is committed in one state batch at the end of
//! the call, so retrying the same offset after a failure is safe.

mod cursor;
mod job;
mod row;

pub use cursor::ImportCursor;
pub use job::{ImportJob, JobState, SliceReport, StartOutcome, StartStatus};
pub use row::{columns, parse_image_list, parse_local_time, ExportRow, RowError};

use crate::config::ImportSettings;
use crate::dedup::LedgerOutcome;
use crate::error::{Error, Result};
use crate::media::{release_all, resolve_all, MediaResolver};
use crate::progress::{ImportProgress, ProgressReporter};
use crate::sink::RecordSink;
use crate::state::{keys, StateBatch, StateHandle};
use chrono::{FixedOffset, Offset, Utc};
use csv::{ByteRecord, ReaderBuilder};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_SLICE_BUDGET: Duration = Duration::from_secs(20);

pub struct ImportEngine {
    state: StateHandle,
    sink: Arc<dyn RecordSink>,
    media: Arc<dyn MediaResolver>,
    imports_dir: PathBuf,
    batch_size: usize,
    slice_budget: Duration,
    source_offset: FixedOffset,
    slice_lock: Mutex<()>,
}

impl ImportEngine {
    /// Bare export timestamps are read as UTC until [`with_settings`] or
    /// [`with_source_offset`] says otherwise.
    ///
    /// [`with_settings`]: ImportEngine::with_settings
    /// [`with_source_offset`]: ImportEngine::with_source_offset
    pub fn new(
        state: StateHandle,
        sink: Arc<dyn RecordSink>,
        media: Arc<dyn MediaResolver>,
        imports_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state,
            sink,
            media,
            imports_dir: imports_dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            slice_budget: DEFAULT_SLICE_BUDGET,
            source_offset: Utc.fix(),
            slice_lock: Mutex::new(()),
        }
    }

    pub fn with_settings(self, settings: &ImportSettings) -> Result<Self> {
        let offset = settings.source_offset()?;
        Ok(self
            .with_batch_size(settings.batch_size)
            .with_slice_budget(settings.slice_budget())
            .with_source_offset(offset))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_slice_budget(mut self, budget: Duration) -> Self {
        self.slice_budget = budget;
        self
    }

    pub fn with_source_offset(mut self, offset: FixedOffset) -> Self {
        self.source_offset = offset;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Begin a new job from `source`, or resume the unfinished one when no
    /// source is given.
    ///
    /// `source` is treated as the caller's temporary copy and is deleted once
    /// the durable copy is committed.
    pub fn start(&self, source: Option<&Path>) -> Result<StartOutcome> {
        let _guard = self.lock_slices();

        let source = match source {
            Some(path) => path,
            None => {
                return match self.load_job()? {
                    Some(job) if !job.is_complete() => {
                        info!("No file supplied, resuming {}", job.original_filename);
                        self.resume_locked(job)
                    }
                    _ => Err(Error::NoSourceSupplied),
                };
            }
        };

        let total = count_data_rows(source)?;
        let durable = self.store_durable_copy(source)?;
        let content_hash = match hash_file(&durable) {
            Ok(hash) => hash,
            Err(e) => {
                remove_quietly(&durable);
                return Err(Error::StorageUnavailable(e.to_string()));
            }
        };

        let previous = self.load_job().unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable previous job");
            None
        });
        if let Some(previous) = &previous {
            info!(
                "Superseding import of {} ({})",
                previous.original_filename,
                previous.source_file_path.display()
            );
            remove_quietly(&previous.source_file_path);
        }

        let now = Utc::now();
        let job = ImportJob {
            source_file_path: durable.clone(),
            original_filename: source
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
            content_hash,
            total_records: total,
            started_at: now,
            last_activity_at: now,
            completed_at: None,
            next_offset: 0,
        };
        let progress = ImportProgress::new(total);

        let mut batch = StateBatch::new();
        batch.put(keys::IMPORT_JOB, &job)?;
        batch.put(keys::IMPORT_PROGRESS, &progress)?;
        let cleared = self
            .state
            .delete_prefix_into(keys::IMPORT_LEDGER_PREFIX, &mut batch)?;
        if let Err(e) = self.state.commit(batch) {
            remove_quietly(&durable);
            return Err(e);
        }

        if let Err(e) = fs::remove_file(source) {
            warn!(path = %source.display(), error = %e, "Could not delete uploaded copy");
        }

        info!(
            file = %durable.display(),
            total,
            cleared_ledger = cleared,
            "Import started for {}",
            job.original_filename
        );
        Ok(StartOutcome::new(StartStatus::Started, &job, &progress))
    }

    /// Continue the persisted job. Fails if its file has gone.
    pub fn resume(&self) -> Result<StartOutcome> {
        let _guard = self.lock_slices();
        let job = self.load_job()?.ok_or(Error::NoActiveJob)?;
        self.resume_locked(job)
    }

    fn resume_locked(&self, mut job: ImportJob) -> Result<StartOutcome> {
        if !job.source_file_path.exists() {
            error!(file = %job.source_file_path.display(), "Import file vanished");
            return Err(Error::SourceMissing(job.source_file_path));
        }
        let progress = self.load_progress_for(&job)?;

        job.last_activity_at = Utc::now();
        self.state.save(keys::IMPORT_JOB, &job)?;

        info!(
            processed = progress.processed,
            total = progress.total,
            next_offset = job.next_offset,
            "Resuming import of {}",
            job.original_filename
        );
        Ok(StartOutcome::new(StartStatus::Resumed, &job, &progress))
    }

    /// Process up to `batch_size` rows from `offset`, stopping early once the
    /// slice budget is spent. Counters in the report are job-cumulative.
    pub fn process_slice(&self, file: &Path, offset: u64) -> Result<SliceReport> {
        let _guard = self.lock_slices();
        let started = Instant::now();

        let mut job = self.load_job()?.ok_or(Error::NoActiveJob)?;
        if !job.owns(file) {
            return Err(Error::JobMismatch(file.to_path_buf()));
        }
        let file = job.source_file_path.clone();
        if !file.exists() {
            error!(file = %file.display(), "Import file vanished");
            return Err(Error::SourceMissing(file));
        }
        if offset > job.total_records {
            return Err(Error::InvalidOffset {
                offset,
                total: job.total_records,
            });
        }
        let mut progress = self.load_progress_for(&job)?;

        let reader = open_csv(&file)?;
        let mut records = reader.into_byte_records();
        for _ in 0..offset {
            match records.next() {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(unreadable(&file, e)),
                None => break,
            }
        }

        let mut pending: HashMap<String, LedgerOutcome> = HashMap::new();
        let mut consumed: u64 = 0;
        let mut skipped: u64 = 0;
        let mut time_boxed = false;
        let mut read_error = None;

        while (consumed as usize) < self.batch_size {
            if consumed > 0 && started.elapsed() >= self.slice_budget {
                time_boxed = true;
                break;
            }
            let record = match records.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    read_error = Some(e);
                    break;
                }
                None => break,
            };
            let row_offset = offset + consumed;
            consumed += 1;

            let row = ExportRow::decode(&record);
            let fingerprint = row.fingerprint();
            if pending.contains_key(&fingerprint)
                || self.state.contains(&keys::import_ledger(&fingerprint))?
            {
                debug!(row = row_offset, %fingerprint, "Skipping already imported row");
                skipped += 1;
                continue;
            }
            if progress.processed >= progress.total {
                return Err(Error::StateCorruption(format!(
                    "row {} would exceed the job total of {}",
                    row_offset, progress.total
                )));
            }

            let outcome = self.import_row(&row, row_offset);
            match outcome {
                LedgerOutcome::Imported => progress.record_success(),
                LedgerOutcome::Failed => progress.record_failure(),
            }
            pending.insert(fingerprint, outcome);
        }

        let is_complete = if time_boxed || read_error.is_some() {
            false
        } else if (consumed as usize) < self.batch_size {
            true
        } else {
            peek_is_end(&mut records)
        };
        let next_offset = offset + consumed;

        let now = Utc::now();
        job.last_activity_at = now;
        job.next_offset = next_offset;
        if is_complete && job.completed_at.is_none() {
            job.completed_at = Some(now);
        }

        let mut batch = StateBatch::new();
        for (fingerprint, outcome) in &pending {
            batch.put(keys::import_ledger(fingerprint), outcome)?;
        }
        batch.put(keys::IMPORT_PROGRESS, &progress)?;
        batch.put(keys::IMPORT_JOB, &job)?;
        self.state.commit(batch)?;

        info!(
            offset,
            next_offset,
            rows = consumed,
            skipped,
            processed = progress.processed,
            total = progress.total,
            time_boxed,
            "Slice done in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        if is_complete {
            info!(
                succeeded = progress.succeeded,
                failed = progress.failed,
                "Import of {} completed",
                job.original_filename
            );
        }

        if let Some(e) = read_error {
            error!(row = next_offset, error = %e, "Stopped slice on unreadable row");
            return Err(unreadable(&file, e));
        }

        Ok(SliceReport {
            processed: progress.processed,
            total: progress.total,
            succeeded: progress.succeeded,
            failed: progress.failed,
            next_offset,
            is_complete,
            rows_in_slice: consumed,
            skipped,
        })
    }

    fn import_row(&self, row: &ExportRow, row_offset: u64) -> LedgerOutcome {
        let mut record = match row.normalize(self.source_offset) {
            Ok(record) => record,
            Err(e) => {
                warn!(row = row_offset, error = %e, "Row could not be normalized");
                return LedgerOutcome::Failed;
            }
        };
        record.media = resolve_all(self.media.as_ref(), &record.media_urls);

        match self.sink.submit(&record) {
            Ok(id) => {
                debug!(
                    row = row_offset,
                    record = %id,
                    media = record.media.len(),
                    "Imported row"
                );
                LedgerOutcome::Imported
            }
            Err(e) => {
                error!(
                    row = row_offset,
                    fingerprint = %record.fingerprint,
                    error = %e,
                    "Record sink refused row"
                );
                release_all(self.media.as_ref(), &record.media);
                LedgerOutcome::Failed
            }
        }
    }

    /// Current counters, all zero when there is no job.
    pub fn progress(&self) -> Result<ImportProgress> {
        Ok(self
            .state
            .load::<ImportProgress>(keys::IMPORT_PROGRESS)?
            .unwrap_or_default())
    }

    pub fn current_job(&self) -> Result<Option<ImportJob>> {
        self.load_job()
    }

    pub fn status(&self) -> Result<JobState> {
        Ok(JobState::of(self.load_job()?.as_ref()))
    }

    /// Drop the job, its file, progress and ledger. Returns whether there was
    /// anything to cancel.
    pub fn cancel(&self) -> Result<bool> {
        let _guard = self.lock_slices();
        let had_job = self.state.contains(keys::IMPORT_JOB)?;

        match self.load_job() {
            Ok(Some(job)) => remove_quietly(&job.source_file_path),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cancelling an unreadable job"),
        }

        let mut batch = StateBatch::new();
        batch.delete(keys::IMPORT_JOB);
        batch.delete(keys::IMPORT_PROGRESS);
        self.state
            .delete_prefix_into(keys::IMPORT_LEDGER_PREFIX, &mut batch)?;
        self.state.commit(batch)?;

        if had_job {
            info!("Import cancelled");
        }
        Ok(had_job)
    }

    /// Cursor positioned where the persisted job left off.
    pub fn cursor(&self) -> Result<ImportCursor<'_>> {
        let job = self.load_job()?.ok_or(Error::NoActiveJob)?;
        Ok(ImportCursor::new(self, job.source_file_path, job.next_offset))
    }

    pub fn cursor_at(&self, file: impl Into<PathBuf>, offset: u64) -> ImportCursor<'_> {
        ImportCursor::new(self, file.into(), offset)
    }

    /// Pull slices from the persisted position until the job completes.
    pub fn drive(&self, reporter: &dyn ProgressReporter) -> Result<ImportProgress> {
        let started = Instant::now();
        let initial = self.progress()?;
        reporter.on_import_start(initial.total, initial.processed);

        let mut last = initial;
        for report in self.cursor()? {
            let report = report?;
            last = report.progress();
            reporter.on_slice_complete(&last, report.next_offset);
        }

        reporter.on_import_complete(&last, started.elapsed().as_secs_f64());
        Ok(last)
    }

    fn load_job(&self) -> Result<Option<ImportJob>> {
        self.state.load::<ImportJob>(keys::IMPORT_JOB)
    }

    fn load_progress_for(&self, job: &ImportJob) -> Result<ImportProgress> {
        let progress = self
            .state
            .load::<ImportProgress>(keys::IMPORT_PROGRESS)?
            .ok_or_else(|| Error::StateCorruption("import progress is missing".to_string()))?;
        if !progress.is_consistent() || progress.total != job.total_records {
            return Err(Error::StateCorruption(format!(
                "progress {:?} does not match job of {} records",
                progress, job.total_records
            )));
        }
        Ok(progress)
    }

    fn store_durable_copy(&self, source: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.imports_dir)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "csv".to_string());
        let target = self
            .imports_dir
            .join(format!("import_{}.{}", uuid::Uuid::new_v4().simple(), extension));
        fs::copy(source, &target).map_err(|e| {
            remove_quietly(&target);
            Error::StorageUnavailable(e.to_string())
        })?;
        Ok(target)
    }

    fn lock_slices(&self) -> MutexGuard<'_, ()> {
        self.slice_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_csv(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|e| Error::SourceUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file))
}

/// Data rows in `path`, header excluded.
fn count_data_rows(path: &Path) -> Result<u64> {
    let mut reader = open_csv(path)?;
    let mut record = ByteRecord::new();
    let mut total = 0u64;
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| unreadable(path, e))?
    {
        total += 1;
    }
    Ok(total)
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn peek_is_end<I>(records: &mut I) -> bool
where
    I: Iterator<Item = csv::Result<ByteRecord>>,
{
    records.next().is_none()
}

fn unreadable(path: &Path, e: csv::Error) -> Error {
    Error::SourceUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaError;
    use crate::sink::{MediaId, NormalizedRecord, RecordId, SinkError};
    use std::io::Write;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tempfile::TempDir;

    struct CountingSink(AtomicI64);

    impl RecordSink for CountingSink {
        fn submit(&self, record: &NormalizedRecord) -> std::result::Result<RecordId, SinkError> {
            if record.content.contains("reject") {
                return Err(SinkError::Rejected("test".to_string()));
            }
            Ok(RecordId(self.0.fetch_add(1, Ordering::SeqCst) + 1))
        }
    }

    struct NoMedia;

    impl MediaResolver for NoMedia {
        fn resolve(&self, url: &str) -> std::result::Result<MediaId, MediaError> {
            Err(MediaError::Fetch {
                url: url.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn engine(dir: &TempDir) -> (ImportEngine, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink(AtomicI64::new(0)));
        let engine = ImportEngine::new(
            StateHandle::in_memory(),
            sink.clone(),
            Arc::new(NoMedia),
            dir.path().join("imports"),
        );
        (engine, sink)
    }

    fn write_export(dir: &TempDir, rows: &[&str]) -> PathBuf {
        let path = dir.path().join("upload.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "stamp,content,images").unwrap();
        for row in rows {
            writeln!(f, "{}", row).unwrap();
        }
        path
    }

    #[test]
    fn test_count_excludes_header() {
        let dir = TempDir::new().unwrap();
        let path = write_export(&dir, &["1,a,", "2,b,", "3,c,"]);
        assert_eq!(count_data_rows(&path).unwrap(), 3);
    }

    #[test]
    fn test_duplicate_rows_in_one_slice_are_skipped() {
        let dir = TempDir::new().unwrap();
        let (engine, sink) = engine(&dir);
        let path = write_export(&dir, &["1,same,", "1,same,", "2,other,"]);
        let started = engine.start(Some(&path)).unwrap();

        let report = engine.process_slice(&started.file, 0).unwrap();
        assert_eq!(report.rows_in_slice, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.succeeded, 2);
        assert!(report.is_complete);
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejected_rows_count_as_failed() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let path = write_export(&dir, &["1,fine,", "2,please reject,"]);
        let started = engine.start(Some(&path)).unwrap();

        let report = engine.process_slice(&started.file, 0).unwrap();
        assert_eq!((report.succeeded, report.failed), (1, 1));
        assert!(report.progress().is_consistent());
    }

    #[test]
    fn test_wrong_file_is_job_mismatch() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let path = write_export(&dir, &["1,a,"]);
        engine.start(Some(&path)).unwrap();

        let err = engine
            .process_slice(Path::new("/elsewhere/import.csv"), 0)
            .unwrap_err();
        assert!(matches!(err, Error::JobMismatch(_)));
    }

    #[test]
    fn test_offset_past_total_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let path = write_export(&dir, &["1,a,"]);
        let started = engine.start(Some(&path)).unwrap();

        let err = engine.process_slice(&started.file, 2).unwrap_err();
        assert!(matches!(err, Error::InvalidOffset { offset: 2, total: 1 }));
    }

    #[test]
    fn test_status_moves_through_states() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        assert_eq!(engine.status().unwrap(), JobState::NoJob);

        let rows: Vec<String> = (0..7).map(|i| format!("{},row {},", i, i)).collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let path = write_export(&dir, &refs);
        let started = engine.start(Some(&path)).unwrap();
        assert_eq!(engine.status().unwrap(), JobState::Started);

        let first = engine.process_slice(&started.file, 0).unwrap();
        assert_eq!(engine.status().unwrap(), JobState::Processing);
        engine.process_slice(&started.file, first.next_offset).unwrap();
        assert_eq!(engine.status().unwrap(), JobState::Completed);
    }

    #[test]
    fn test_start_without_source_or_job() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        assert!(matches!(engine.start(None), Err(Error::NoSourceSupplied)));
        assert!(matches!(engine.resume(), Err(Error::NoActiveJob)));
        assert!(!engine.cancel().unwrap());
    }
}
