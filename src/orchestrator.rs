//! Main orchestration logic for a pipeline run.

use crate::error::{EntryError, PipelineError};
use crate::pool::WorkerPool;
use crate::process::{process_entry, sweep_stale_workspaces, ProcessContext, SOURCE_STAGE};
use crate::report::{deliver_summary, timestamp_now, RunReport, StatusReporter};
use crate::scan::{list_pending, resolve};
use crate::store::StageStore;
use crate::transition::transition;
use crate::types::{PipelineConfig, Stage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Runs the unpack stage once over everything currently queued.
///
/// This is the main entry point. It performs the following steps:
///
/// 1. Validates the configured roots (fatal on failure, nothing is touched)
/// 2. Removes workspaces left behind by an interrupted run
/// 3. Scans all hosts for queued entries, smallest archive first
/// 4. Processes the backlog on `max_workers` parallel workers
/// 5. Merges the per-entry reports and delivers the summary to `reporter`
///
/// Per-entry failures never fail the run; they are counted in the returned
/// report and the entries stay queued for the next run.
///
/// # Example
///
/// ```no_run
/// use benchpipe::{run_pipeline, LogReporter, PipelineConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::default();
/// let report = run_pipeline(&config, &LogReporter).await?;
/// println!("{} errors", report.errors);
/// # Ok(())
/// # }
/// ```
pub async fn run_pipeline(
    config: &PipelineConfig,
    reporter: &dyn StatusReporter,
) -> Result<RunReport, PipelineError> {
    config.validate()?;

    let ctx = Arc::new(ProcessContext::from_config(config));
    let swept = sweep_stale_workspaces(&ctx.layout)?;
    if swept > 0 {
        info!("{}: removed {} stale workspaces", config.run_name, swept);
    }
    let scan = list_pending(&ctx.store, SOURCE_STAGE)?;

    let mut report = RunReport::default();
    for failure in scan.unreadable.iter().chain(&scan.broken) {
        error!("{}", failure);
        report.record_unattributed(failure);
    }
    for duplicate in &scan.duplicates {
        report.record_duplicate(duplicate);
    }

    let total = scan.entries.len();
    info!(
        "{}: {} entries queued, {} broken, {} unreadable stage dirs, {} duplicates, {} workers",
        config.run_name,
        total,
        scan.broken.len(),
        scan.unreadable.len(),
        scan.duplicates.len(),
        config.max_workers
    );

    let pb = progress_bar(total as u64);
    let mut pool = WorkerPool::new(config.max_workers);

    for entry in scan.entries {
        let ctx = Arc::clone(&ctx);
        let pb = pb.clone();
        pool.submit(move || {
            pb.set_message(format!("{}/{}", entry.host, entry.name));
            let entry_report = process_entry(&ctx, &entry);
            pb.inc(1);
            entry_report
        })
        .await?;
    }

    for result in pool.shutdown().await {
        match result {
            Ok(entry_report) => report.merge(entry_report),
            Err(e) => {
                error!("Worker failed: {}", e);
                report.record_lost_worker(&e.to_string());
            }
        }
    }
    pb.finish_and_clear();

    info!(
        "{}: {} processed, {} already done, {} errors, {} warnings, {} duplicates",
        config.run_name,
        report.processed,
        report.already_done,
        report.errors,
        report.warnings,
        report.duplicates
    );

    let timestamp = timestamp_now();
    let summary = report.summary(&config.run_name, &timestamp);
    deliver_summary(reporter, &config.run_name, &timestamp, &summary);

    Ok(report)
}

/// Reference counts of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub stage: Stage,
    pub pending: usize,
    pub pending_bytes: u64,
    pub broken: usize,
    pub duplicates: usize,
    /// Host stage directories that could not be listed.
    pub unreadable: usize,
}

/// Scans every stage without changing anything.
pub fn stage_status(config: &PipelineConfig) -> Result<Vec<StageStatus>, PipelineError> {
    require_archive_root(config)?;
    let store = StageStore::new(&config.archive_root, config.stage_dirs.clone());

    let mut status = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        let scan = list_pending(&store, stage)?;
        status.push(StageStatus {
            stage,
            pending: scan.entries.len(),
            pending_bytes: scan.entries.iter().map(|e| e.size).sum(),
            broken: scan.broken.len(),
            duplicates: scan.duplicates.len(),
            unreadable: scan.unreadable.len(),
        });
    }
    Ok(status)
}

/// Moves one queue-reference a single step forward.
///
/// Used by downstream consumers once they have handled an entry, and for
/// manual triage.
pub fn advance(
    config: &PipelineConfig,
    host: &str,
    archive_file: &str,
    from: Stage,
) -> Result<PathBuf, AdvanceError> {
    require_archive_root(config)?;
    let store = StageStore::new(&config.archive_root, config.stage_dirs.clone());
    let reference = store.reference_path(host, from, archive_file.as_ref());
    let entry = resolve(host, from, reference)?;
    let to = from.next().unwrap_or(from);
    let moved = transition(&store, &entry, to)?;
    info!("{}/{}: advanced {} -> {}", host, entry.name, from, to);
    Ok(moved)
}

/// Failure of [`advance`].
#[derive(thiserror::Error, Debug)]
pub enum AdvanceError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Entry(#[from] EntryError),
}

fn require_archive_root(config: &PipelineConfig) -> Result<(), PipelineError> {
    if !config.archive_root.is_dir() {
        return Err(PipelineError::MissingRoot {
            name: "archive",
            path: config.archive_root.clone(),
        });
    }
    Ok(())
}

/// Run progress bar, hidden when stderr is not a terminal.
fn progress_bar(total: u64) -> indicatif::ProgressBar {
    if !atty::is(atty::Stream::Stderr) {
        return indicatif::ProgressBar::hidden();
    }

    let pb = indicatif::ProgressBar::new(total);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed")
    {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb
}
