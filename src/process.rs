//! Item processor: takes one queued entry to the unpacked stage.
//!
//! Steps, in order:
//!
//! 1. Re-resolve the queue-reference (it may have broken since the scan)
//! 2. Skip duplicate-marked names
//! 3. Ensure the per-host incoming and results directories
//! 4. If the result is already unpacked, republish missing links and commit
//! 5. Verify the archive checksum
//! 6. Extract into a private workspace and check its structure
//! 7. Normalize permissions
//! 8. Read prefix and user
//! 9. Move the tree into place and publish its links
//! 10. Commit: move the queue-reference to the next stage
//!
//! A failure in steps 5-9 removes everything created for the entry and leaves
//! the reference where it was. A failed commit keeps the published result; the
//! next run finds it at step 4 and only repeats the commit.

use crate::error::EntryError;
use crate::extract::{check_structure, extract_archive};
use crate::metadata::read_entry_metadata;
use crate::permissions::{make_removable, normalize_permissions};
use crate::publish::{move_into_place, publish_links, PublishLayout, Rollback};
use crate::report::RunReport;
use crate::scan::resolve;
use crate::store::{ensure_dir, StageStore};
use crate::transition::transition;
use crate::types::{Entry, PipelineConfig, Stage};
use crate::verify::{verify_archive, Verification};
use std::io;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Stage the processor consumes.
pub const SOURCE_STAGE: Stage = Stage::Queued;
/// Stage a successfully processed entry lands in.
pub const TARGET_STAGE: Stage = Stage::Unpacked;

/// Everything a worker needs to process entries. Shared read-only.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub store: StageStore,
    pub layout: PublishLayout,
    pub skip_verify: bool,
}

impl ProcessContext {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            store: StageStore::new(&config.archive_root, config.stage_dirs.clone()),
            layout: PublishLayout {
                incoming_root: config.incoming_root.clone(),
                results_root: config.results_root.clone(),
                users_root: config.users_root.clone(),
            },
            skip_verify: config.skip_verify,
        }
    }
}

/// How an entry left the processor without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Extracted, published and advanced
    Advanced,
    /// Found already published; only the commit was performed
    AlreadyDone,
    /// Duplicate-marked, nothing done
    Duplicate,
}

/// Processes one entry and returns the report of this invocation.
///
/// Never fails: errors are logged, recorded in the report and the entry is
/// left at its stage for the next run.
pub fn process_entry(ctx: &ProcessContext, entry: &Entry) -> RunReport {
    let mut report = RunReport::default();
    match unpack_entry(ctx, entry, &mut report) {
        Ok(Outcome::Advanced) => {
            info!("{}/{}: unpacked", entry.host, entry.name);
            report.record_processed(entry);
        }
        Ok(Outcome::AlreadyDone) => {
            info!("{}/{}: already unpacked", entry.host, entry.name);
            report.record_already_done(entry);
        }
        Ok(Outcome::Duplicate) => {
            debug!("{}/{}: duplicate, skipped", entry.host, entry.name);
            report.record_duplicate(entry);
        }
        Err(e) => {
            error!("{}/{}: {} failed: {}", entry.host, entry.name, e.step(), e);
            report.record_error(&entry.host, &entry.name, &e);
        }
    }
    report
}

/// Runs the processing steps for one entry. Soft conditions go to `report`.
pub fn unpack_entry(
    ctx: &ProcessContext,
    entry: &Entry,
    report: &mut RunReport,
) -> Result<Outcome, EntryError> {
    let entry = resolve(&entry.host, entry.stage, entry.reference.clone())?;
    if entry.is_duplicate() {
        return Ok(Outcome::Duplicate);
    }

    let host = entry.host.as_str();
    let name = entry.name.as_str();
    let incoming_dir = ctx.layout.incoming_host_dir(host);
    for dir in [incoming_dir.clone(), ctx.layout.results_host_dir(host)] {
        ensure_dir(&dir).map_err(|source| EntryError::DirectoryCreate {
            path: dir.clone(),
            source,
        })?;
    }

    let unpacked = ctx.layout.unpacked_path(host, name);
    let legacy_prefix = ctx.store.legacy_prefix_path(host, name);

    if std::fs::symlink_metadata(&unpacked).is_ok() {
        debug!("{}/{}: {} exists", host, name, unpacked.display());
        let metadata = read_entry_metadata(&unpacked, &legacy_prefix);
        let mut rollback = Rollback::new();
        publish_links(&ctx.layout, host, name, &metadata, &mut rollback)?;
        rollback.commit();
        transition(&ctx.store, &entry, TARGET_STAGE)?;
        return Ok(Outcome::AlreadyDone);
    }

    if !ctx.skip_verify && verify_archive(&entry)? == Verification::MissingSidecar {
        report.warn(host, name, "no checksum sidecar, archive not verified");
    }

    let workspace = Workspace(
        tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .tempdir_in(&incoming_dir)
            .map_err(|source| EntryError::DirectoryCreate {
                path: incoming_dir.clone(),
                source,
            })?,
    );
    debug!("{}/{}: workspace {}", host, name, workspace.path().display());

    extract_archive(&entry.archive, workspace.path())?;
    let extra = check_structure(workspace.path(), name, &entry.archive)?;
    if !extra.is_empty() {
        report.warn(
            host,
            name,
            format!("ignoring extra top-level items: {}", extra.join(", ")),
        );
    }

    let extracted = workspace.path().join(name);
    let fixed = normalize_permissions(&extracted)?;
    debug!("{}/{}: fixed permissions on {} items", host, name, fixed);

    let metadata = read_entry_metadata(&extracted, &legacy_prefix);

    let mut rollback = Rollback::new();
    move_into_place(&extracted, &unpacked, &mut rollback)?;
    publish_links(&ctx.layout, host, name, &metadata, &mut rollback)?;
    rollback.commit();
    drop(workspace);

    transition(&ctx.store, &entry, TARGET_STAGE)?;
    Ok(Outcome::Advanced)
}

/// Private extraction directory, removed on drop even when the archive left
/// read-only directories behind.
struct Workspace(tempfile::TempDir);

impl Workspace {
    fn path(&self) -> &Path {
        self.0.path()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        make_removable(self.0.path());
    }
}

/// Removes workspaces left under `<incoming_root>/<host>/` by a run that was
/// killed mid-extraction. Must only be called while no worker is running.
///
/// Returns the number of workspaces removed.
pub fn sweep_stale_workspaces(layout: &PublishLayout) -> io::Result<usize> {
    let mut removed = 0;
    for host_dir in std::fs::read_dir(&layout.incoming_root)?.flatten() {
        if !host_dir.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let items = match std::fs::read_dir(host_dir.path()) {
            Ok(items) => items,
            Err(e) => {
                warn!("Cannot list {}: {}", host_dir.path().display(), e);
                continue;
            }
        };

        for item in items.flatten() {
            if !is_workspace_name(&item.file_name().to_string_lossy())
                || !item.file_type().map(|t| t.is_dir()).unwrap_or(false)
            {
                continue;
            }
            let path = item.path();
            make_removable(&path);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Removed stale workspace {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Cannot remove stale workspace {}: {}", path.display(), e),
            }
        }
    }
    Ok(removed)
}

/// Workspaces are named `.<result>.<random>`.
fn is_workspace_name(file_name: &str) -> bool {
    file_name
        .strip_prefix('.')
        .map_or(false, |rest| rest.contains('.'))
}
