//! Entry metadata: placement prefix and owning user.
//!
//! All format-specific parsing lives here. Every failure is soft: a result
//! with unreadable metadata is still published, just without a prefix or user.

use crate::types::EntryMetadata;
use std::io;
use std::path::{Component, Path};
use tracing::warn;

/// Metadata record inside every unpacked result directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Reads `prefix` and `user` for an unpacked result.
///
/// The prefix comes from the embedded record, else from the legacy sidecar.
/// Both values are normalized; anything unusable becomes `None`.
pub fn read_entry_metadata(result_dir: &Path, legacy_prefix: &Path) -> EntryMetadata {
    let embedded = read_embedded(&result_dir.join(METADATA_FILE));

    let prefix = embedded
        .prefix
        .as_deref()
        .and_then(normalize_prefix)
        .or_else(|| read_legacy_prefix(legacy_prefix).as_deref().and_then(normalize_prefix));
    let user = embedded.user.as_deref().and_then(normalize_user);

    EntryMetadata { prefix, user }
}

/// Normalizes a prefix to relative, clean components ending in exactly one `/`.
///
/// ```
/// use benchpipe::metadata::normalize_prefix;
///
/// assert_eq!(normalize_prefix("/perf//x"), Some("perf/x/".to_string()));
/// assert_eq!(normalize_prefix("  "), None);
/// ```
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let parts: Vec<&str> = Path::new(raw.trim())
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        return None;
    }
    Some(format!("{}/", parts.join("/")))
}

fn normalize_user(raw: &str) -> Option<String> {
    let user = raw.trim();
    let mut components = Path::new(user).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(user.to_string()),
        _ => None,
    }
}

fn read_embedded(path: &Path) -> EntryMetadata {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return EntryMetadata::default(),
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            return EntryMetadata::default();
        }
    };

    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!("Ignoring malformed {}: {}", path.display(), e);
        EntryMetadata::default()
    })
}

fn read_legacy_prefix(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("perf/"), Some("perf/".to_string()));
        assert_eq!(normalize_prefix("perf"), Some("perf/".to_string()));
        assert_eq!(normalize_prefix("a/b///"), Some("a/b/".to_string()));
        assert_eq!(normalize_prefix("../../etc"), Some("etc/".to_string()));
        assert_eq!(normalize_prefix("/"), None);
        assert_eq!(normalize_prefix(""), None);
    }

    #[test]
    fn test_normalize_user() {
        assert_eq!(normalize_user(" alice\n"), Some("alice".to_string()));
        assert_eq!(normalize_user("../root"), None);
        assert_eq!(normalize_user("a/b"), None);
        assert_eq!(normalize_user(""), None);
    }

    #[test]
    fn test_embedded_metadata_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            r#"{"prefix": "perf/", "user": "alice", "controller": "ignored"}"#,
        )
        .unwrap();
        let legacy = dir.path().join("run.prefix");
        std::fs::write(&legacy, "legacy\n").unwrap();

        let metadata = read_entry_metadata(dir.path(), &legacy);
        assert_eq!(metadata.prefix.as_deref(), Some("perf/"));
        assert_eq!(metadata.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_legacy_prefix_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), r#"{"user": "bob"}"#).unwrap();
        let legacy = dir.path().join("run.prefix");
        std::fs::write(&legacy, "fio/nightly\n").unwrap();

        let metadata = read_entry_metadata(dir.path(), &legacy);
        assert_eq!(metadata.prefix.as_deref(), Some("fio/nightly/"));
        assert_eq!(metadata.user.as_deref(), Some("bob"));
    }

    #[test]
    fn test_malformed_metadata_is_soft() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "{not json").unwrap();

        let metadata = read_entry_metadata(dir.path(), &dir.path().join("missing.prefix"));
        assert_eq!(metadata, EntryMetadata::default());
    }
}
