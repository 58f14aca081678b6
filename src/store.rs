//! Stage store: the per-host directory layout that encodes pipeline state.
//!
//! ```text
//! <archive_root>/<host>/<result>.tar.gz          archive
//! <archive_root>/<host>/<result>.tar.gz.md5      checksum sidecar
//! <archive_root>/<host>/.prefix/<result>.prefix  legacy prefix sidecar
//! <archive_root>/<host>/<STAGE-DIR>/<result>.tar.gz -> ../<result>.tar.gz
//! ```

use crate::types::{Stage, StageDirs};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

/// Directory holding legacy prefix sidecars inside each host directory.
const PREFIX_DIR: &str = ".prefix";

/// Resolves stage directories under an archive root.
#[derive(Debug, Clone)]
pub struct StageStore {
    archive_root: PathBuf,
    dirs: StageDirs,
}

impl StageStore {
    pub fn new(archive_root: impl Into<PathBuf>, dirs: StageDirs) -> Self {
        Self {
            archive_root: archive_root.into(),
            dirs,
        }
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// Directory holding all archives of `host`.
    pub fn host_dir(&self, host: &str) -> PathBuf {
        self.archive_root.join(host)
    }

    /// Directory holding the queue-references of `host` at `stage`.
    pub fn stage_dir(&self, host: &str, stage: Stage) -> PathBuf {
        self.host_dir(host).join(self.dirs.name(stage))
    }

    /// Where the queue-reference named `file_name` lives when at `stage`.
    pub fn reference_path(&self, host: &str, stage: Stage, file_name: &OsStr) -> PathBuf {
        self.stage_dir(host, stage).join(file_name)
    }

    /// Legacy sidecar holding the placement prefix of `name`.
    pub fn legacy_prefix_path(&self, host: &str, name: &str) -> PathBuf {
        self.host_dir(host)
            .join(PREFIX_DIR)
            .join(format!("{}.prefix", name))
    }

    /// Lists host directories, sorted. Hidden directories are skipped.
    pub fn hosts(&self) -> io::Result<Vec<String>> {
        let mut hosts = Vec::new();
        for dir_entry in std::fs::read_dir(&self.archive_root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = dir_entry.file_name().to_str() {
                if !name.starts_with('.') {
                    hosts.push(name.to_string());
                }
            }
        }
        hosts.sort();
        Ok(hosts)
    }
}

/// Creates `path` and its parents. A directory created concurrently by
/// another worker counts as success.
///
/// Callers wrap the error in the variant of the step they are performing.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}
