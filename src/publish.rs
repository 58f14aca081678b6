//! Publication of unpacked results into the browsable trees.
//!
//! ```text
//! <incoming_root>/<host>/<result>                       unpacked tree
//! <results_root>/<host>/<prefix><result>                -> unpacked tree
//! <users_root>/<user>/<host>/<prefix><result>           -> unpacked tree
//! ```
//!
//! Published items are created once and never rewritten. Everything created
//! for an entry is recorded in a [`Rollback`] journal so a failed entry leaves
//! no trace behind.

use crate::error::EntryError;
use crate::permissions::make_removable;
use crate::store::ensure_dir;
use crate::types::EntryMetadata;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Roots of the unpacked and published trees.
#[derive(Debug, Clone)]
pub struct PublishLayout {
    pub incoming_root: PathBuf,
    pub results_root: PathBuf,
    pub users_root: PathBuf,
}

impl PublishLayout {
    /// Per-host directory holding unpacked results and their workspaces.
    pub fn incoming_host_dir(&self, host: &str) -> PathBuf {
        self.incoming_root.join(host)
    }

    /// Final location of an unpacked result.
    pub fn unpacked_path(&self, host: &str, name: &str) -> PathBuf {
        self.incoming_host_dir(host).join(name)
    }

    /// Per-host root of the results tree.
    pub fn results_host_dir(&self, host: &str) -> PathBuf {
        self.results_root.join(host)
    }

    /// Primary published link.
    pub fn result_link(&self, host: &str, prefix: Option<&str>, name: &str) -> PathBuf {
        with_prefix(self.results_host_dir(host), prefix).join(name)
    }

    /// Secondary, user-scoped published link.
    pub fn user_link(&self, user: &str, host: &str, prefix: Option<&str>, name: &str) -> PathBuf {
        with_prefix(self.users_root.join(user).join(host), prefix).join(name)
    }
}

fn with_prefix(base: PathBuf, prefix: Option<&str>) -> PathBuf {
    match prefix {
        Some(prefix) => base.join(prefix),
        None => base,
    }
}

#[derive(Debug)]
enum Created {
    Tree(PathBuf),
    Link(PathBuf),
}

/// Journal of everything created for one entry.
///
/// Dropping an armed journal removes the recorded items in reverse order.
/// [`Rollback::commit`] disarms it.
#[derive(Debug, Default)]
pub struct Rollback {
    created: Vec<Created>,
    committed: bool,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, item: Created) {
        self.created.push(item);
    }

    /// Keeps everything recorded so far.
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Number of recorded items.
    pub fn len(&self) -> usize {
        self.created.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for item in self.created.iter().rev() {
            let (path, result) = match item {
                Created::Tree(path) => {
                    make_removable(path);
                    (path, std::fs::remove_dir_all(path))
                }
                Created::Link(path) => (path, std::fs::remove_file(path)),
            };
            match result {
                Ok(()) => debug!("Rolled back {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Rollback of {} failed: {}", path.display(), e),
            }
        }
    }
}

/// Moves an extracted result from its workspace to its final location.
pub fn move_into_place(
    extracted: &Path,
    unpacked: &Path,
    rollback: &mut Rollback,
) -> Result<(), EntryError> {
    let failed = |source: io::Error| EntryError::Publish {
        path: unpacked.to_path_buf(),
        source,
    };

    if std::fs::symlink_metadata(unpacked).is_ok() {
        return Err(failed(io::Error::from(io::ErrorKind::AlreadyExists)));
    }
    std::fs::rename(extracted, unpacked).map_err(failed)?;
    rollback.record(Created::Tree(unpacked.to_path_buf()));
    Ok(())
}

/// Creates `link` pointing at `target` unless something already exists there.
///
/// Returns whether a new link was created.
pub fn ensure_link(target: &Path, link: &Path, rollback: &mut Rollback) -> Result<bool, EntryError> {
    if std::fs::symlink_metadata(link).is_ok() {
        debug!("{} already published", link.display());
        return Ok(false);
    }
    if let Some(parent) = link.parent() {
        ensure_dir(parent).map_err(|source| EntryError::Publish {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    match symlink(target, link) {
        Ok(()) => {
            rollback.record(Created::Link(link.to_path_buf()));
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(source) => Err(EntryError::Publish {
            path: link.to_path_buf(),
            source,
        }),
    }
}

/// Publishes the result and, when a user is known, its user-scoped link.
///
/// Returns the published link paths, whether new or pre-existing.
pub fn publish_links(
    layout: &PublishLayout,
    host: &str,
    name: &str,
    metadata: &EntryMetadata,
    rollback: &mut Rollback,
) -> Result<Vec<PathBuf>, EntryError> {
    let unpacked = layout.unpacked_path(host, name);
    let prefix = metadata.prefix.as_deref();

    let mut links = vec![layout.result_link(host, prefix, name)];
    if let Some(user) = metadata.user.as_deref() {
        links.push(layout.user_link(user, host, prefix, name));
    }

    for link in &links {
        ensure_link(&unpacked, link, rollback)?;
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(root: &Path) -> PublishLayout {
        PublishLayout {
            incoming_root: root.join("incoming"),
            results_root: root.join("results"),
            users_root: root.join("users"),
        }
    }

    #[test]
    fn test_link_paths() {
        let layout = layout(Path::new("/srv"));
        assert_eq!(
            layout.result_link("hostA", Some("perf/"), "run-007"),
            PathBuf::from("/srv/results/hostA/perf/run-007")
        );
        assert_eq!(
            layout.user_link("alice", "hostA", Some("perf/"), "run-007"),
            PathBuf::from("/srv/users/alice/hostA/perf/run-007")
        );
        assert_eq!(
            layout.result_link("hostA", None, "run-007"),
            PathBuf::from("/srv/results/hostA/run-007")
        );
    }

    #[test]
    fn test_publish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        std::fs::create_dir_all(layout.unpacked_path("hostA", "run")).unwrap();
        let metadata = EntryMetadata {
            prefix: Some("perf/".to_string()),
            user: Some("alice".to_string()),
        };

        let mut rollback = Rollback::new();
        let links = publish_links(&layout, "hostA", "run", &metadata, &mut rollback).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(rollback.len(), 2);
        rollback.commit();
        for link in &links {
            assert_eq!(
                std::fs::read_link(link).unwrap(),
                layout.unpacked_path("hostA", "run")
            );
        }

        let mut again = Rollback::new();
        publish_links(&layout, "hostA", "run", &metadata, &mut again).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_rollback_removes_created_items() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let extracted = dir.path().join("ws/run");
        std::fs::create_dir_all(&extracted).unwrap();
        std::fs::write(extracted.join("f"), b"x").unwrap();
        std::fs::create_dir_all(layout.incoming_host_dir("hostA")).unwrap();
        let unpacked = layout.unpacked_path("hostA", "run");

        {
            let mut rollback = Rollback::new();
            move_into_place(&extracted, &unpacked, &mut rollback).unwrap();
            publish_links(&layout, "hostA", "run", &EntryMetadata::default(), &mut rollback)
                .unwrap();
            assert!(unpacked.join("f").exists());
        }

        assert!(!unpacked.exists());
        assert!(std::fs::symlink_metadata(layout.result_link("hostA", None, "run")).is_err());
    }

    #[test]
    fn test_move_into_place_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let extracted = dir.path().join("ws/run");
        let unpacked = dir.path().join("run");
        std::fs::create_dir_all(&extracted).unwrap();
        std::fs::create_dir_all(&unpacked).unwrap();

        let mut rollback = Rollback::new();
        assert!(matches!(
            move_into_place(&extracted, &unpacked, &mut rollback),
            Err(EntryError::Publish { .. })
        ));
        assert!(rollback.is_empty());
        drop(rollback);
        assert!(unpacked.exists());
    }

    #[test]
    fn test_blocked_link_parent_is_a_publish_failure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        std::fs::create_dir_all(layout.unpacked_path("hostA", "run")).unwrap();
        std::fs::create_dir_all(&layout.users_root.join("alice")).unwrap();
        std::fs::write(layout.users_root.join("alice/hostA"), b"in the way").unwrap();
        let metadata = EntryMetadata {
            prefix: None,
            user: Some("alice".to_string()),
        };

        {
            let mut rollback = Rollback::new();
            let err = publish_links(&layout, "hostA", "run", &metadata, &mut rollback).unwrap_err();
            assert!(matches!(err, EntryError::Publish { .. }));
            assert_eq!(err.step(), "publish");
            assert_eq!(rollback.len(), 1);
        }
        assert!(std::fs::symlink_metadata(layout.result_link("hostA", None, "run")).is_err());
    }
}
