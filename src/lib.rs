pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod import;
pub mod logging;
pub mod media;
pub mod progress;
pub mod reporting;
pub mod sink;
pub mod state;
pub mod storage;

pub use crate::config::AppConfig;
pub use context::AppContext;
pub use error::{Error, ErrorClass, Result};
pub use feed::{FeedSyncEngine, SyncOutcome, SyncScheduler, SyncTrigger};
pub use import::{ImportCursor, ImportEngine, SliceReport, StartOutcome, StartStatus};
pub use progress::{ImportProgress, ProgressReporter, SilentReporter};
pub use sink::{NormalizedRecord, RecordSink};
