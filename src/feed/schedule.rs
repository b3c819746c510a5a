use super::{FeedSyncEngine, SyncTrigger};
use crate::error::Error;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Interval timer driving [`SyncTrigger::Scheduled`] runs.
pub struct SyncScheduler {
    engine: Arc<FeedSyncEngine>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<FeedSyncEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            worker: Mutex::new(None),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock_worker().is_some()
    }

    /// Start the timer: one run right away, then one per interval. A no-op
    /// when already armed.
    pub fn arm(&self) -> std::io::Result<()> {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            return Ok(());
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let engine = Arc::clone(&self.engine);
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name("feed-sync".to_string())
            .spawn(move || loop {
                run_scheduled(&engine);
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        info!(interval_secs = interval.as_secs(), "Feed sync scheduled");
        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stop future runs. A run already in flight finishes normally; this
    /// waits for it. Returns whether the timer was armed.
    pub fn disarm(&self) -> bool {
        let worker = self.lock_worker().take();
        match worker {
            Some(Worker { stop, handle }) => {
                drop(stop);
                if handle.join().is_err() {
                    error!("Feed sync thread panicked");
                }
                info!("Feed sync unscheduled");
                true
            }
            None => false,
        }
    }

    /// Arm or disarm to match the persisted toggle.
    pub fn apply(&self, enabled: bool) -> std::io::Result<()> {
        if enabled {
            self.arm()
        } else {
            self.disarm();
            Ok(())
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn run_scheduled(engine: &FeedSyncEngine) {
    match engine.sync(SyncTrigger::Scheduled) {
        Ok(outcome) => debug!(imported = outcome.imported_count, "Scheduled sync finished"),
        Err(Error::FeedDisabled) => debug!("Scheduled sync skipped"),
        Err(e) => warn!(error = %e, "Scheduled sync failed"),
    }
}
