use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "history-importer")]
#[command(about = "Import a social media history export and keep an RSS or Atom feed in sync", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start importing an export CSV, or resume the unfinished import
    Start {
        /// CSV export; omit to resume
        file: Option<PathBuf>,
        /// Only register the job, do not process any rows
        #[arg(long)]
        no_run: bool,
    },
    /// Process a single slice of the active import
    Process {
        /// Job file reported by `start`
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Continue the active import until it completes
    Resume,
    /// Cancel the active import and delete its state
    Cancel,
    /// Show import progress and feed state
    Progress {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the most recent log lines
    Logs {
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },
    /// Empty the log file
    ClearLogs,
    /// Sync the RSS or Atom feed now
    Sync,
    /// Show or change feed settings
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },
    /// Run scheduled feed syncs until interrupted
    Watch,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Subcommand)]
pub enum FeedAction {
    /// Show feed URL, toggle and last sync time
    Show,
    /// Set the feed URL (empty to clear)
    SetUrl { url: String },
    /// Turn scheduled sync on
    Enable,
    /// Turn scheduled sync off
    Disable,
}
