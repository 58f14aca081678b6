//! Benchpipe - a crash-safe, staged pipeline for benchmark result archives
//!
//! Archives uploaded by many hosts move through a fixed sequence of stages.
//! An entry's stage is simply the stage directory holding its queue-reference,
//! a symlink to the archive, so the filesystem is both the queue and the state
//! store. This crate implements the unpack stage and the machinery around it.
//!
//! # Features
//!
//! - **Atomic Progress**: Entries advance by a single rename, never half-moved
//! - **Idempotent Runs**: Already published results are detected, never re-extracted
//! - **Rollback**: A failed entry leaves no partial output behind
//! - **Bounded Concurrency**: A fixed worker pool with backpressure, smallest entries first
//! - **Run Summary**: Per-entry outcomes are collected into one status report
//!
//! # Example
//!
//! ```no_run
//! use benchpipe::{run_pipeline, FileReporter, PipelineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig {
//!     archive_root: "/srv/archive".into(),
//!     incoming_root: "/srv/incoming".into(),
//!     results_root: "/srv/results".into(),
//!     users_root: "/srv/users".into(),
//!     ..PipelineConfig::default()
//! };
//!
//! let report = run_pipeline(&config, &FileReporter::new("/srv/reports")).await?;
//! println!("{} entries unpacked", report.processed);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod extract;
pub mod metadata;
pub mod orchestrator;
pub mod permissions;
pub mod pool;
pub mod process;
pub mod publish;
pub mod report;
pub mod scan;
pub mod store;
pub mod transition;
pub mod types;
pub mod verify;

pub use error::{EntryError, PipelineError};
pub use orchestrator::{advance, run_pipeline, stage_status, AdvanceError, StageStatus};
pub use pool::WorkerPool;
pub use process::{process_entry, Outcome, ProcessContext};
pub use report::{FileReporter, LogReporter, RunReport, StatusReporter};
pub use scan::{list_pending, ScanOutcome};
pub use store::StageStore;
pub use transition::transition;
pub use types::{Entry, EntryMetadata, PipelineConfig, Stage, StageDirs};
