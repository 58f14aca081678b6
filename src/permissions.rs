//! Permission normalization of unpacked trees.

use crate::error::EntryError;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// Bits every directory must carry: world read and search, owner write so
/// the tree can still be removed by the user that unpacked it.
const DIR_BITS: u32 = 0o755;
/// Bits every regular file must carry (world read).
const FILE_BITS: u32 = 0o444;

/// Makes every directory under `root` world-readable and searchable and every
/// regular file world-readable. Symlinks are left alone.
///
/// Directories also get the owner write bit.
///
/// Returns the number of items whose mode changed.
pub fn normalize_permissions(root: &Path) -> Result<u64, EntryError> {
    let mut changed = 0u64;

    for entry_result in WalkDir::new(root).follow_links(false) {
        let entry = entry_result.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            EntryError::PermissionFix {
                path,
                source: e.into_io_error().unwrap_or_else(|| io::Error::other("walk failed")),
            }
        })?;

        let file_type = entry.file_type();
        let required = if file_type.is_dir() {
            DIR_BITS
        } else if file_type.is_file() {
            FILE_BITS
        } else {
            continue;
        };

        let fix = |source: io::Error| EntryError::PermissionFix {
            path: entry.path().to_path_buf(),
            source,
        };
        let mut permissions = entry.metadata().map_err(|e| fix(e.into()))?.permissions();
        let mode = permissions.mode();
        if mode & required != required {
            permissions.set_mode(mode | required);
            std::fs::set_permissions(entry.path(), permissions).map_err(fix)?;
            changed += 1;
        }
    }

    Ok(changed)
}

/// Adds owner `rwx` to every directory under `root` so it can be deleted.
///
/// Best effort: used right before a workspace or a stale tree is removed,
/// where a half-extracted archive may have left read-only directories.
pub fn make_removable(root: &Path) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            let mut permissions = metadata.permissions();
            let mode = permissions.mode();
            if mode & 0o700 != 0o700 {
                permissions.set_mode(mode | 0o700);
                let _ = std::fs::set_permissions(entry.path(), permissions);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(path: &Path) -> u32 {
        std::fs::symlink_metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_normalize_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/private.txt"), b"x").unwrap();
        std::fs::write(root.join("open.txt"), b"y").unwrap();
        std::fs::set_permissions(root.join("sub/private.txt"), std::fs::Permissions::from_mode(0o600))
            .unwrap();
        std::fs::set_permissions(root.join("open.txt"), std::fs::Permissions::from_mode(0o644)).unwrap();
        std::fs::set_permissions(root.join("sub"), std::fs::Permissions::from_mode(0o500)).unwrap();

        let changed = normalize_permissions(&root).unwrap();
        assert!(changed >= 2);
        assert_eq!(mode(&root.join("sub")), 0o755);
        assert_eq!(mode(&root.join("sub/private.txt")), 0o644);
        assert_eq!(mode(&root.join("open.txt")), 0o644);

        assert_eq!(normalize_permissions(&root).unwrap(), 0);
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            normalize_permissions(&dir.path().join("missing")),
            Err(EntryError::PermissionFix { .. })
        ));
    }

    #[test]
    fn test_make_removable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(".run.ws");
        std::fs::create_dir_all(root.join("run/locked")).unwrap();
        std::fs::write(root.join("run/locked/f"), b"x").unwrap();
        std::fs::set_permissions(root.join("run/locked"), std::fs::Permissions::from_mode(0o555))
            .unwrap();
        std::fs::set_permissions(root.join("run"), std::fs::Permissions::from_mode(0o555)).unwrap();

        make_removable(&root);
        assert_eq!(mode(&root.join("run")), 0o755);
        assert_eq!(mode(&root.join("run/locked")), 0o755);
        std::fs::remove_dir_all(&root).unwrap();
        assert!(!root.exists());
    }
}
