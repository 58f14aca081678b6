//! Archive verification against the uploader's MD5 sidecar.

use crate::error::EntryError;
use crate::types::Entry;
use md5::{Digest, Md5};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info};

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Digest matched the sidecar
    Verified,
    /// No sidecar next to the archive, nothing to compare against
    MissingSidecar,
}

/// Computes the MD5 hash of a local file.
///
/// The file is read in 1MB chunks to avoid loading large archives entirely
/// into memory.
pub fn compute_file_md5(path: &Path) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Reads the expected digest from an `md5sum`-style sidecar.
///
/// Returns `Ok(None)` when the sidecar does not exist.
pub fn read_checksum_sidecar(path: &Path) -> io::Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let digest = content
        .split_whitespace()
        .next()
        .map(|d| d.to_ascii_lowercase())
        .filter(|d| d.len() == 32 && d.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed checksum sidecar"))?;
    Ok(Some(digest))
}

/// Verifies `entry`'s archive against its checksum sidecar.
pub fn verify_archive(entry: &Entry) -> Result<Verification, EntryError> {
    let failure = |reason: String| EntryError::ValidationFailure {
        archive: entry.archive.clone(),
        reason,
    };

    let sidecar = entry.checksum_path();
    let expected = match read_checksum_sidecar(&sidecar) {
        Ok(Some(expected)) => expected,
        Ok(None) => return Ok(Verification::MissingSidecar),
        Err(e) => return Err(failure(format!("{}: {}", sidecar.display(), e))),
    };

    debug!("Verifying MD5 for {}/{}", entry.host, entry.name);
    let actual = compute_file_md5(&entry.archive).map_err(|e| failure(e.to_string()))?;

    if actual != expected {
        return Err(failure(format!(
            "MD5 mismatch: expected {}, got {}",
            expected, actual
        )));
    }
    info!("MD5 verified for {}/{}", entry.host, entry.name);
    Ok(Verification::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;
    use std::path::PathBuf;

    // md5("hello world\n")
    const HELLO_MD5: &str = "6f5902ac237024bdd0c176cb93063dc4";

    fn entry_for(archive: PathBuf) -> Entry {
        Entry {
            host: "hostA".to_string(),
            name: "run".to_string(),
            reference: archive.clone(),
            archive,
            size: 12,
            stage: Stage::Queued,
        }
    }

    #[test]
    fn test_compute_file_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello world\n").unwrap();
        assert_eq!(compute_file_md5(&path).unwrap(), HELLO_MD5);
    }

    #[test]
    fn test_verify_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("run.tar.gz");
        std::fs::write(&archive, b"hello world\n").unwrap();
        let entry = entry_for(archive);

        assert_eq!(verify_archive(&entry).unwrap(), Verification::MissingSidecar);

        std::fs::write(
            entry.checksum_path(),
            format!("{}  run.tar.gz\n", HELLO_MD5.to_uppercase()),
        )
        .unwrap();
        assert_eq!(verify_archive(&entry).unwrap(), Verification::Verified);

        std::fs::write(entry.checksum_path(), format!("{}  run.tar.gz\n", "0".repeat(32))).unwrap();
        assert!(matches!(
            verify_archive(&entry),
            Err(EntryError::ValidationFailure { .. })
        ));

        std::fs::write(entry.checksum_path(), "garbage").unwrap();
        assert!(verify_archive(&entry).is_err());
    }
}
