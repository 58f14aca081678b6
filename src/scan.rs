//! Stage scanner: builds the backlog of entries waiting at a stage.

use crate::error::EntryError;
use crate::store::StageStore;
use crate::types::{result_name, Entry, Stage};
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Result of scanning one stage across all hosts.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Processable entries, ascending by archive size.
    pub entries: Vec<Entry>,
    /// References whose archive could not be resolved.
    pub broken: Vec<EntryError>,
    /// Entries carrying the duplicate marker, excluded from `entries`.
    pub duplicates: Vec<Entry>,
    /// Stage directories that exist but could not be listed.
    pub unreadable: Vec<EntryError>,
}

/// Lists the entries currently at `stage`, smallest archive first.
///
/// Small entries are not held up behind large ones when workers are scarce.
/// Broken references and duplicates are reported separately and never end up
/// in the backlog.
pub fn list_pending(store: &StageStore, stage: Stage) -> io::Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();

    for host in store.hosts()? {
        let stage_dir = store.stage_dir(&host, stage);
        let references = match reference_names(&stage_dir) {
            Ok(references) => references,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                warn!("Cannot list {}: {}", stage_dir.display(), source);
                outcome.unreadable.push(EntryError::UnreadableStage {
                    path: stage_dir,
                    source,
                });
                continue;
            }
        };

        for reference in references {
            match resolve(&host, stage, reference) {
                Ok(entry) if entry.is_duplicate() => outcome.duplicates.push(entry),
                Ok(entry) => outcome.entries.push(entry),
                Err(e) => outcome.broken.push(e),
            }
        }
    }

    // Stable sort keeps the host/name order among equal sizes.
    outcome.entries.sort_by_key(|entry| entry.size);

    debug!(
        "Scanned {}: {} pending, {} broken, {} duplicates, {} unreadable",
        stage,
        outcome.entries.len(),
        outcome.broken.len(),
        outcome.duplicates.len(),
        outcome.unreadable.len()
    );
    Ok(outcome)
}

/// Resolves a queue-reference of `host` at `stage` into an [`Entry`].
pub fn resolve(host: &str, stage: Stage, reference: PathBuf) -> Result<Entry, EntryError> {
    let broken = |source: io::Error| EntryError::BrokenLink {
        reference: reference.clone(),
        source,
    };

    let metadata = std::fs::metadata(&reference).map_err(broken)?;
    if !metadata.is_file() {
        return Err(broken(io::Error::new(
            io::ErrorKind::InvalidInput,
            "target is not a regular file",
        )));
    }
    let archive = std::fs::canonicalize(&reference).map_err(broken)?;

    let file_name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| broken(io::Error::new(io::ErrorKind::InvalidData, "non UTF-8 name")))?;
    let name = result_name(file_name).to_string();

    Ok(Entry {
        host: host.to_string(),
        name,
        archive,
        reference,
        size: metadata.len(),
        stage,
    })
}

/// Sorted paths of everything inside a stage directory.
fn reference_names(stage_dir: &std::path::Path) -> io::Result<Vec<PathBuf>> {
    let mut references = Vec::new();
    for dir_entry in std::fs::read_dir(stage_dir)? {
        let dir_entry = dir_entry?;
        if dir_entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        references.push(dir_entry.path());
    }
    references.sort();
    Ok(references)
}
