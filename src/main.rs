mod cli;
mod reporter;

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, FeedAction};
use colored::*;
use dotenv::dotenv;
use history_importer::config::load_configuration;
use history_importer::{AppContext, Error, SyncTrigger};
use reporter::CliReporter;
use tracing::{error, info};

const WATCH_POLL: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();

    let config = load_configuration().context("loading configuration")?;
    let _guard = history_importer::logging::init_logger(&config.logging)
        .context("initialising logging")?;

    let args = Cli::parse();
    let command = match args.command {
        Some(command) => command,
        None => {
            let _ = Cli::command().print_long_help();
            return Ok(ExitCode::SUCCESS);
        }
    };

    if let Commands::PrintConfig = command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let ctx = AppContext::open(&config).context("opening data directory")?;
    // no process::exit here, the logger guard has to drop to flush the file
    match run(&ctx, command) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            error!(class = ?err.class(), "Error: {}", err);
            eprintln!("{}", err.user_message().red());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run(ctx: &AppContext, command: Commands) -> history_importer::Result<()> {
    match command {
        Commands::Start { file, no_run } => {
            let outcome = match file {
                Some(path) => {
                    let staged = ctx.stage_upload(&path)?;
                    ctx.import.start(Some(&staged))?
                }
                None => ctx.import.start(None)?,
            };
            println!(
                "{} {} ({} of {} rows done)",
                outcome.status.as_str().green(),
                outcome.file.display(),
                outcome.processed,
                outcome.total
            );
            if !no_run {
                drive_import(ctx)?;
            }
        }
        Commands::Process { file, offset } => {
            let report = ctx.import.process_slice(&file, offset)?;
            println!("{}", to_json(&report));
        }
        Commands::Resume => {
            let outcome = ctx.import.resume()?;
            println!(
                "{} at row {} of {}",
                outcome.status.as_str().green(),
                outcome.next_offset,
                outcome.total
            );
            drive_import(ctx)?;
        }
        Commands::Cancel => {
            if ctx.import.cancel()? {
                println!("{}", "Import cancelled".yellow());
            } else {
                println!("No import in progress");
            }
        }
        Commands::Progress { json } => {
            let snapshot = ctx.status.snapshot()?;
            if json {
                println!("{}", to_json(&snapshot));
            } else {
                let p = snapshot.progress;
                println!(
                    "Import: {:?}, {} / {} processed ({:.1}%), {} succeeded, {} failed",
                    snapshot.job_state,
                    format!("{}", p.processed).cyan(),
                    p.total,
                    p.percent(),
                    format!("{}", p.succeeded).green(),
                    format!("{}", p.failed).red(),
                );
                print_feed_state(&snapshot.feed);
            }
        }
        Commands::Logs { lines } => {
            let lines = match lines {
                Some(n) => ctx.status.recent_logs_n(n)?,
                None => ctx.status.recent_logs()?,
            };
            for line in lines {
                println!("{}", line);
            }
            println!("{}", format!("log size {}", ctx.status.log_size()?).dimmed());
        }
        Commands::ClearLogs => {
            ctx.status.clear_logs()?;
            println!("Logs cleared");
        }
        Commands::Sync => {
            let reporter = CliReporter::new();
            match ctx.feed.sync_with(SyncTrigger::Manual, &reporter) {
                Ok(outcome) => println!(
                    "{}",
                    serde_json::json!({ "success": true, "importedCount": outcome.imported_count })
                ),
                Err(err) => {
                    println!(
                        "{}",
                        serde_json::json!({ "success": false, "message": err.user_message() })
                    );
                    return Err(err);
                }
            }
        }
        Commands::Feed { action } => {
            match action {
                FeedAction::Show => {}
                FeedAction::SetUrl { url } => {
                    ctx.feed.set_feed_url(Some(&url))?;
                }
                FeedAction::Enable => {
                    ctx.feed.set_enabled(true)?;
                }
                FeedAction::Disable => {
                    ctx.feed.set_enabled(false)?;
                }
            }
            print_feed_state(&ctx.feed.state()?);
        }
        Commands::Watch => watch(ctx)?,
        Commands::PrintConfig => {}
    }
    Ok(())
}

fn drive_import(ctx: &AppContext) -> history_importer::Result<()> {
    let reporter = CliReporter::new();
    let progress = ctx.import.drive(&reporter)?;
    info!(
        "{} succeeded, {} failed, {} total",
        format!("{}", progress.succeeded).green(),
        format!("{}", progress.failed).red(),
        progress.total,
    );
    Ok(())
}

/// Keep the scheduler in step with the persisted toggle until killed.
fn watch(ctx: &AppContext) -> history_importer::Result<()> {
    if ctx.feed.settings()?.feed_url.is_none() {
        return Err(Error::FeedUnconfigured);
    }
    info!("Watching feed settings, Ctrl-C to stop");
    loop {
        let enabled = ctx.feed.settings()?.sync_enabled;
        if enabled != ctx.scheduler.is_armed() {
            ctx.scheduler.apply(enabled)?;
            if !enabled {
                println!("{}", "Sync disabled, waiting for it to be enabled".yellow());
            }
        }
        thread::sleep(WATCH_POLL);
    }
}

fn print_feed_state(feed: &history_importer::feed::FeedSyncState) {
    let url = feed.feed_url.as_deref().unwrap_or("(not set)");
    let toggle = if feed.sync_enabled {
        "enabled".green()
    } else {
        "disabled".red()
    };
    let last = feed
        .last_sync_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "Feed: {} sync {}, last sync {}, {} remembered entries",
        url, toggle, last, feed.ledger_len
    );
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}
