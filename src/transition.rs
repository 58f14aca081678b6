//! Atomic stage transitions.
//!
//! Moving an entry is a single `rename(2)` of its queue-reference between two
//! sibling stage directories of the same host. Scanners of the destination
//! stage either see the whole reference or nothing.

use crate::error::EntryError;
use crate::store::{ensure_dir, StageStore};
use crate::types::{Entry, Stage};
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Moves `entry`'s queue-reference from its current stage to `to`.
///
/// Only single forward steps are accepted. Returns the new reference path.
/// When both stages map to the same directory the move is a logical no-op.
pub fn transition(store: &StageStore, entry: &Entry, to: Stage) -> Result<PathBuf, EntryError> {
    let from = entry.reference.clone();
    let file_name = from
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let target = store.reference_path(&entry.host, to, &file_name);

    if entry.stage.next() != Some(to) {
        return Err(EntryError::Transition {
            from,
            to: target,
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} -> {} is not a single forward step", entry.stage, to),
            ),
        });
    }

    if target == from {
        debug!(
            "{}/{}: {} and {} share a directory, nothing to move",
            entry.host, entry.name, entry.stage, to
        );
        return Ok(target);
    }

    let failed = |source: io::Error| EntryError::Transition {
        from: from.clone(),
        to: target.clone(),
        source,
    };
    if let Some(parent) = target.parent() {
        ensure_dir(parent).map_err(failed)?;
    }
    std::fs::rename(&from, &target).map_err(failed)?;

    debug!(
        "{}/{}: moved {} -> {}",
        entry.host, entry.name, entry.stage, to
    );
    Ok(target)
}
