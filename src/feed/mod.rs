//! RSS feed ingestion with a bounded dedup ring.

mod fetch;
pub mod markup;
mod schedule;

pub use fetch::{parse_feed, FeedEntry, FeedFetcher, HttpFeedFetcher};
pub use schedule::SyncScheduler;

use crate::dedup::{entry_fingerprint, FeedLedger};
use crate::error::{Error, Result};
use crate::media::{release_all, resolve_all, MediaResolver};
use crate::progress::{ProgressReporter, SilentReporter};
use crate::sink::{NormalizedRecord, RecordOrigin, RecordSink};
use crate::state::{keys, StateHandle};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// User-facing feed configuration. Persisted under `feed:settings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub feed_url: Option<String>,
    pub sync_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSyncState {
    pub feed_url: Option<String>,
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub ledger_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Manual,
    /// Refused with [`Error::FeedDisabled`] while sync is switched off.
    Scheduled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub imported_count: usize,
    pub entries: usize,
    pub already_seen: usize,
    pub failed: usize,
}

pub struct FeedSyncEngine {
    state: StateHandle,
    sink: Arc<dyn RecordSink>,
    media: Arc<dyn MediaResolver>,
    fetcher: Arc<dyn FeedFetcher>,
    sync_lock: Mutex<()>,
}

impl FeedSyncEngine {
    pub fn new(
        state: StateHandle,
        sink: Arc<dyn RecordSink>,
        media: Arc<dyn MediaResolver>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        Self {
            state,
            sink,
            media,
            fetcher,
            sync_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> Result<FeedConfig> {
        Ok(self
            .state
            .load::<FeedConfig>(keys::FEED_SETTINGS)?
            .unwrap_or_default())
    }

    /// Set or clear (`None` / blank) the feed URL. Only http(s) URLs are kept.
    pub fn set_feed_url(&self, url: Option<&str>) -> Result<FeedConfig> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        if let Some(raw) = url {
            let parsed = Url::parse(raw).map_err(|e| Error::InvalidFeedUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::InvalidFeedUrl {
                    url: raw.to_string(),
                    reason: format!("unsupported scheme {}", parsed.scheme()),
                });
            }
        }

        let mut settings = self.settings()?;
        settings.feed_url = url.map(str::to_string);
        self.state.save(keys::FEED_SETTINGS, &settings)?;
        info!(feed_url = ?settings.feed_url, "Feed URL updated");
        Ok(settings)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<FeedConfig> {
        let mut settings = self.settings()?;
        settings.sync_enabled = enabled;
        self.state.save(keys::FEED_SETTINGS, &settings)?;
        info!("Feed sync {}", if enabled { "enabled" } else { "disabled" });
        Ok(settings)
    }

    pub fn ledger(&self) -> Result<FeedLedger> {
        let mut ledger = self
            .state
            .load::<FeedLedger>(keys::FEED_LEDGER)?
            .unwrap_or_default();
        ledger.trim();
        Ok(ledger)
    }

    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.state.load::<DateTime<Utc>>(keys::FEED_LAST_SYNC)
    }

    pub fn state(&self) -> Result<FeedSyncState> {
        let settings = self.settings()?;
        Ok(FeedSyncState {
            feed_url: settings.feed_url,
            sync_enabled: settings.sync_enabled,
            last_sync_at: self.last_sync_at()?,
            ledger_len: self.ledger()?.len(),
        })
    }

    pub fn sync(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        self.sync_with(trigger, &SilentReporter)
    }

    /// Fetch the feed and import every entry not already in the ledger.
    ///
    /// Per-entry failures are logged and counted; only a missing URL or a
    /// fetch/parse failure fails the run. Runs on one engine never overlap.
    pub fn sync_with(
        &self,
        trigger: SyncTrigger,
        reporter: &dyn ProgressReporter,
    ) -> Result<SyncOutcome> {
        let _guard = self
            .sync_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let started = Instant::now();

        let settings = self.settings()?;
        if trigger == SyncTrigger::Scheduled && !settings.sync_enabled {
            debug!("Scheduled sync skipped, sync is disabled");
            return Err(Error::FeedDisabled);
        }
        let url = settings.feed_url.ok_or(Error::FeedUnconfigured)?;

        info!(feed_url = %url, ?trigger, "Starting feed sync");
        reporter.on_sync_start(&url);
        let entries = self.fetcher.fetch(&url).map_err(|e| {
            error!(feed_url = %url, error = %e, "Feed fetch failed");
            e
        })?;

        let mut ledger = self.ledger()?;
        let mut outcome = SyncOutcome {
            entries: entries.len(),
            ..SyncOutcome::default()
        };

        for (index, entry) in entries.iter().enumerate() {
            let unique_id = entry.unique_id();
            let fingerprint = entry_fingerprint(&unique_id);
            if ledger.contains(&fingerprint) {
                debug!(entry = %unique_id, "Entry already imported");
                outcome.already_seen += 1;
                reporter.on_sync_entry(index, entries.len(), false);
                continue;
            }

            let imported = self.import_entry(entry, &unique_id, fingerprint.clone());
            if imported {
                ledger.insert(fingerprint);
                self.state.save(keys::FEED_LEDGER, &ledger)?;
                outcome.imported_count += 1;
            } else {
                outcome.failed += 1;
            }
            reporter.on_sync_entry(index, entries.len(), imported);
        }

        self.state.save(keys::FEED_LAST_SYNC, &Utc::now())?;
        let secs = started.elapsed().as_secs_f64();
        reporter.on_sync_complete(outcome.imported_count, outcome.entries, secs);
        info!(
            imported = outcome.imported_count,
            entries = outcome.entries,
            failed = outcome.failed,
            "Feed sync completed in {:.2}s",
            secs
        );
        Ok(outcome)
    }

    fn import_entry(&self, entry: &FeedEntry, unique_id: &str, fingerprint: String) -> bool {
        let media_urls = markup::extract_image_urls(&entry.body);
        let media = resolve_all(self.media.as_ref(), &media_urls);
        let content = markup::clean_entry_body(&entry.body);

        let record = NormalizedRecord {
            origin: RecordOrigin::FeedSync,
            fingerprint,
            raw_fields: vec![
                unique_id.to_string(),
                entry.link.clone().unwrap_or_default(),
                entry.published.clone().unwrap_or_default(),
                entry.body.clone(),
            ],
            content,
            media_urls,
            media,
            recorded_at: entry.published_at(),
            source_ref: entry.link.clone(),
        };
        if record.recorded_at.is_none() {
            warn!(entry = %unique_id, "Entry has no usable publish date");
        }

        match self.sink.submit(&record) {
            Ok(id) => {
                debug!(entry = %unique_id, record = %id, "Imported feed entry");
                true
            }
            Err(e) => {
                error!(entry = %unique_id, error = %e, "Failed to import feed entry");
                release_all(self.media.as_ref(), &record.media);
                false
            }
        }
    }
}
