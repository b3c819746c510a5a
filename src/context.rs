use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::feed::{FeedSyncEngine, HttpFeedFetcher, SyncScheduler};
use crate::import::ImportEngine;
use crate::logging::LogTail;
use crate::media::HttpMediaResolver;
use crate::reporting::StatusBoard;
use crate::state::{RocksStore, StateHandle};
use crate::storage::ActivityStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Everything a binary needs, wired from one [`AppConfig`].
pub struct AppContext {
    pub config: AppConfig,
    pub state: StateHandle,
    pub activities: Arc<ActivityStore>,
    pub import: Arc<ImportEngine>,
    pub feed: Arc<FeedSyncEngine>,
    pub scheduler: SyncScheduler,
    pub status: StatusBoard,
}

impl AppContext {
    pub fn open(config: &AppConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)
            .map_err(|e| Error::StorageUnavailable(format!("{}: {}", config.data_dir.display(), e)))?;

        let state = StateHandle::new(Arc::new(RocksStore::open(&config.state_dir())?));
        let activities = Arc::new(ActivityStore::open(&config.activity_db_path())?);
        info!("Activity store at {}", config.activity_db_path().display());

        let media = Arc::new(
            HttpMediaResolver::new(
                config.media_dir(),
                Arc::clone(&activities),
                config.media.timeout_secs.map(Duration::from_secs),
            )
            .map_err(|e| Error::StorageUnavailable(format!("media client: {}", e)))?,
        );
        let fetcher = Arc::new(
            HttpFeedFetcher::new(config.feed.fetch_timeout(), &config.feed.user_agent)
                .map_err(|e| Error::StorageUnavailable(format!("feed client: {}", e)))?,
        );

        let import = Arc::new(
            ImportEngine::new(
                state.clone(),
                activities.clone(),
                media.clone(),
                config.imports_dir(),
            )
            .with_settings(&config.import)?,
        );
        let feed = Arc::new(FeedSyncEngine::new(
            state.clone(),
            activities.clone(),
            media,
            fetcher,
        ));
        let scheduler = SyncScheduler::new(Arc::clone(&feed), config.feed.sync_interval());
        let status = StatusBoard::new(
            Arc::clone(&import),
            Arc::clone(&feed),
            LogTail::new(&config.logging.file),
            config.logging.recent_lines,
        );

        Ok(Self {
            config: config.clone(),
            state,
            activities,
            import,
            feed,
            scheduler,
            status,
        })
    }

    /// Copy a user's file into the staging directory so `start` can delete
    /// the copy without touching the original. The copy always gets a fresh
    /// name, so a file already in the staging directory is never overwritten.
    pub fn stage_upload(&self, source: &Path) -> Result<PathBuf> {
        let staging = self.config.staging_dir();
        fs::create_dir_all(&staging).map_err(|e| Error::StorageUnavailable(e.to_string()))?;

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());
        let staged = staging.join(format!("{}-{}", uuid::Uuid::new_v4().simple(), name));
        fs::copy(source, &staged).map_err(|e| Error::SourceUnreadable {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Staged {} as {}", source.display(), staged.display());
        Ok(staged)
    }
}
