//! Error types for pipeline runs.
//!
//! Two levels exist. [`PipelineError`] aborts a whole run and is only raised
//! before any entry has been touched. [`EntryError`] is scoped to a single
//! entry: it is caught at the entry boundary, logged into the run report, and
//! the entry is left at its current stage for the next run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// I/O error outside of any single entry.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// JSON configuration could not be parsed.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// A required root directory is missing or not a directory.
    #[error("Required {name} root {} is missing or not a directory", path.display())]
    MissingRoot { name: &'static str, path: PathBuf },

    /// Configuration values are unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not accept more work.
    #[error("Worker pool closed unexpectedly")]
    PoolClosed,
}

/// Hard failures of a single entry.
#[derive(Error, Debug)]
pub enum EntryError {
    /// A stage directory exists but cannot be listed.
    #[error("cannot list stage directory {}: {source}", path.display())]
    UnreadableStage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The queue-reference does not resolve to a readable archive.
    #[error("broken queue-reference {}: {source}", reference.display())]
    BrokenLink {
        reference: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Archive checksum could not be confirmed.
    #[error("checksum validation failed for {}: {reason}", archive.display())]
    ValidationFailure { archive: PathBuf, reason: String },

    /// A directory needed by the entry could not be created.
    #[error("cannot create directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive could not be unpacked.
    #[error("cannot extract {}: {source}", archive.display())]
    Extraction {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive does not contain a top-level directory named after the result.
    #[error("archive {} has no top-level directory {name:?}", archive.display())]
    StructureMismatch { archive: PathBuf, name: String },

    /// Permissions of the unpacked tree could not be normalized.
    #[error("cannot fix permissions on {}: {source}", path.display())]
    PermissionFix {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The unpacked tree or one of its published links could not be created.
    #[error("cannot publish {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The commit rename between stage directories failed.
    #[error("cannot move {} to {}: {source}", from.display(), to.display())]
    Transition {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EntryError {
    /// Name of the pipeline step that failed.
    pub fn step(&self) -> &'static str {
        match self {
            EntryError::UnreadableStage { .. } => "scan",
            EntryError::BrokenLink { .. } => "resolve",
            EntryError::ValidationFailure { .. } => "validate",
            EntryError::DirectoryCreate { .. } => "prepare",
            EntryError::Extraction { .. } => "extract",
            EntryError::StructureMismatch { .. } => "structure",
            EntryError::PermissionFix { .. } => "permissions",
            EntryError::Publish { .. } => "publish",
            EntryError::Transition { .. } => "commit",
        }
    }
}
