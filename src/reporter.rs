use history_importer::{ImportProgress, ProgressReporter};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Terminal progress for imports and syncs using indicatif bars.
///
/// - Import: bar over `total` rows, positioned at `processed`
/// - Sync: spinner, then a bar once the entry count is known
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.slot();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.slot().take() {
            pb.finish_and_clear();
        }
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICKS)
}

impl ProgressReporter for CliReporter {
    fn on_import_start(&self, total: u64, processed: u64) {
        let pb = ProgressBar::new(total);
        pb.set_style(bar_style(
            "  {spinner:.cyan} Importing [{bar:30.cyan/dim}] {pos}/{len} rows ({eta} remaining)",
        ));
        pb.set_position(processed);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_slice_complete(&self, progress: &ImportProgress, _next_offset: u64) {
        if let Some(pb) = self.slot().as_ref() {
            pb.set_position(progress.processed);
            if progress.failed > 0 {
                pb.set_message(format!("{} failed", progress.failed));
            }
        }
    }

    fn on_import_complete(&self, progress: &ImportProgress, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Import complete: {} of {} rows ({} failed) in {:.2}s",
            progress.succeeded, progress.total, progress.failed, duration_secs
        );
    }

    fn on_sync_start(&self, feed_url: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICKS),
        );
        pb.set_message(format!("Fetching {}...", feed_url));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_sync_entry(&self, index: usize, entries: usize, _imported: bool) {
        let mut guard = self.slot();
        let needs_bar = guard.as_ref().map_or(true, |pb| pb.length().is_none());
        if needs_bar {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            let pb = ProgressBar::new(entries as u64);
            pb.set_style(bar_style(
                "  {spinner:.cyan} Syncing [{bar:30.cyan/dim}] {pos}/{len} entries",
            ));
            *guard = Some(pb);
        }
        if let Some(pb) = guard.as_ref() {
            pb.set_position(index as u64 + 1);
        }
    }

    fn on_sync_complete(&self, imported: usize, entries: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Sync complete: {} new of {} entries in {:.2}s",
            imported, entries, duration_secs
        );
    }
}
