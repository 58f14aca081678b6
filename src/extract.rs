//! Tar archive extraction into a private workspace.

use crate::error::EntryError;
use flate2::read::GzDecoder;
use std::io;
use std::path::Path;
use tar::Archive;
use tracing::debug;

/// Extracts a gzipped tar archive into `workspace`.
///
/// Ownership recorded in the archive is not restored; modification times are.
pub fn extract_archive(archive_path: &Path, workspace: &Path) -> Result<(), EntryError> {
    let failed = |source: io::Error| EntryError::Extraction {
        archive: archive_path.to_path_buf(),
        source,
    };

    let file = std::fs::File::open(archive_path).map_err(failed)?;
    let reader = io::BufReader::with_capacity(4 * 1024 * 1024, file);
    let mut archive = Archive::new(GzDecoder::new(reader));
    archive.set_preserve_ownerships(false);
    archive.set_preserve_mtime(true);
    archive.unpack(workspace).map_err(failed)?;

    debug!(
        "Extracted {} into {}",
        archive_path.display(),
        workspace.display()
    );
    Ok(())
}

/// Checks that `workspace` holds a top-level directory called `name`.
///
/// Returns the names of any other top-level items, which callers report and
/// otherwise ignore.
pub fn check_structure(
    workspace: &Path,
    name: &str,
    archive_path: &Path,
) -> Result<Vec<String>, EntryError> {
    let failed = |source: io::Error| EntryError::Extraction {
        archive: archive_path.to_path_buf(),
        source,
    };

    let mut found = false;
    let mut extra = Vec::new();
    for dir_entry in std::fs::read_dir(workspace).map_err(failed)? {
        let dir_entry = dir_entry.map_err(failed)?;
        let item = dir_entry.file_name().to_string_lossy().into_owned();
        if item == name && dir_entry.file_type().map_err(failed)?.is_dir() {
            found = true;
        } else {
            extra.push(item);
        }
    }

    if !found {
        return Err(EntryError::StructureMismatch {
            archive: archive_path.to_path_buf(),
            name: name.to_string(),
        });
    }
    extra.sort();
    Ok(extra)
}
