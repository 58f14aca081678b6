//! Run accounting and the end-of-run status summary.
//!
//! Every worker fills its own [`RunReport`]; the coordinator merges them once
//! the pool has drained, so no report is ever written from two threads.

use crate::error::EntryError;
use crate::types::Entry;
use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};

/// Counters and ordered per-entry messages of one pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Entries extracted, published and advanced.
    pub processed: u64,
    /// Entries found already published; only their transition was performed.
    pub already_done: u64,
    /// Hard failures, entries left at their stage.
    pub errors: u64,
    /// Soft conditions that did not stop an entry.
    pub warnings: u64,
    /// Entries skipped because of the duplicate marker.
    pub duplicates: u64,
    pub messages: Vec<String>,
}

impl RunReport {
    pub fn record_processed(&mut self, entry: &Entry) {
        self.processed += 1;
        self.messages
            .push(format!("{}/{}: unpacked and published", entry.host, entry.name));
    }

    pub fn record_already_done(&mut self, entry: &Entry) {
        self.already_done += 1;
        self.messages.push(format!(
            "{}/{}: already published, stage advanced",
            entry.host, entry.name
        ));
    }

    pub fn record_duplicate(&mut self, entry: &Entry) {
        self.duplicates += 1;
        self.messages.push(format!(
            "{}/{}: duplicate name, left for manual handling",
            entry.host, entry.name
        ));
    }

    pub fn record_error(&mut self, host: &str, name: &str, err: &EntryError) {
        self.errors += 1;
        self.messages
            .push(format!("{}/{}: {}: {}", host, name, err.step(), err));
    }

    /// Records a failure for which no host/name could be derived.
    pub fn record_unattributed(&mut self, err: &EntryError) {
        self.errors += 1;
        self.messages.push(format!("{}: {}", err.step(), err));
    }

    /// Records a worker that died without returning its report.
    pub fn record_lost_worker(&mut self, reason: &str) {
        self.errors += 1;
        self.messages.push(format!("worker lost: {}", reason));
    }

    pub fn warn(&mut self, host: &str, name: &str, message: impl AsRef<str>) {
        self.warnings += 1;
        self.messages
            .push(format!("{}/{}: warning: {}", host, name, message.as_ref()));
    }

    /// Folds another report into this one, appending its messages.
    pub fn merge(&mut self, other: RunReport) {
        self.processed += other.processed;
        self.already_done += other.already_done;
        self.errors += other.errors;
        self.warnings += other.warnings;
        self.duplicates += other.duplicates;
        self.messages.extend(other.messages);
    }

    /// Formats the status document delivered at the end of a run.
    pub fn summary(&self, run_name: &str, timestamp: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", run_name, timestamp);
        let _ = writeln!(
            out,
            "Processed {} entries ({} already published): {} errors, {} warnings, {} duplicates",
            self.processed + self.already_done,
            self.already_done,
            self.errors,
            self.warnings,
            self.duplicates
        );
        if !self.messages.is_empty() {
            out.push('\n');
            for message in &self.messages {
                let _ = writeln!(out, "{}", message);
            }
        }
        out
    }
}

/// RFC 3339 timestamp (seconds precision) of the current time.
pub fn timestamp_now() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

/// Receiver of the end-of-run summary.
pub trait StatusReporter: Send + Sync {
    fn deliver(&self, run_name: &str, timestamp: &str, summary: &str) -> io::Result<()>;
}

/// Emits the summary through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn deliver(&self, run_name: &str, timestamp: &str, summary: &str) -> io::Result<()> {
        info!("Status report {} at {}:\n{}", run_name, timestamp, summary);
        Ok(())
    }
}

/// Writes each summary to `<dir>/<run_name>.<timestamp>.txt`.
#[derive(Debug, Clone)]
pub struct FileReporter {
    dir: PathBuf,
}

impl FileReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File a summary for `run_name` at `timestamp` is written to.
    pub fn report_path(&self, run_name: &str, timestamp: &str) -> PathBuf {
        let stamp: String = timestamp
            .chars()
            .map(|c| if c == ':' { '-' } else { c })
            .collect();
        self.dir.join(format!("{}.{}.txt", run_name, stamp))
    }
}

impl StatusReporter for FileReporter {
    fn deliver(&self, run_name: &str, timestamp: &str, summary: &str) -> io::Result<()> {
        let path = self.report_path(run_name, timestamp);
        std::fs::write(&path, summary)?;
        info!("Status report written to {}", path.display());
        Ok(())
    }
}

/// Hands `summary` to `reporter`. Delivery problems are logged, never raised.
pub fn deliver_summary(reporter: &dyn StatusReporter, run_name: &str, timestamp: &str, summary: &str) {
    if let Err(e) = reporter.deliver(run_name, timestamp, summary) {
        warn!("Failed to deliver status report for {}: {}", run_name, e);
    }
}
