//! Data structures shared by the pipeline stages.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result names carrying this marker were renamed by the uploader to avoid a
/// collision and are never processed as normal entries.
pub const DUPLICATE_MARKER: &str = "DUPLICATE__NAME";

/// Archive suffixes stripped to obtain the result name.
const ARCHIVE_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];

/// Position of an entry in the forward pipeline.
///
/// The order of the variants is the pipeline order; an entry only ever moves
/// to [`Stage::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Stage {
    /// Uploaded, waiting to be validated and unpacked
    Queued,
    /// Unpacked and published, waiting for auxiliary copies
    Unpacked,
    /// Auxiliary data copied, waiting for indexing
    CopiedAux,
    /// Indexed, waiting for backup
    Indexed,
    /// Fully handled
    Done,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Queued,
        Stage::Unpacked,
        Stage::CopiedAux,
        Stage::Indexed,
        Stage::Done,
    ];

    /// The stage an entry moves to after a successful step, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Unpacked),
            Stage::Unpacked => Some(Stage::CopiedAux),
            Stage::CopiedAux => Some(Stage::Indexed),
            Stage::Indexed => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Queued => "queued",
            Stage::Unpacked => "unpacked",
            Stage::CopiedAux => "copied-aux",
            Stage::Indexed => "indexed",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Directory names holding the queue-references of each stage.
///
/// Two stages may share a directory name; moving between them is then a
/// logical no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageDirs {
    pub queued: String,
    pub unpacked: String,
    pub copied_aux: String,
    pub indexed: String,
    pub done: String,
}

impl Default for StageDirs {
    fn default() -> Self {
        Self {
            queued: "TO-UNPACK".to_string(),
            unpacked: "TO-COPY-AUX".to_string(),
            copied_aux: "TO-INDEX".to_string(),
            indexed: "TO-BACKUP".to_string(),
            done: "DONE".to_string(),
        }
    }
}

impl StageDirs {
    /// Directory name used for `stage`.
    pub fn name(&self, stage: Stage) -> &str {
        match stage {
            Stage::Queued => &self.queued,
            Stage::Unpacked => &self.unpacked,
            Stage::CopiedAux => &self.copied_aux,
            Stage::Indexed => &self.indexed,
            Stage::Done => &self.done,
        }
    }
}

/// One benchmark result moving through the pipeline.
///
/// Identity is `(host, name)`. The entry's stage is wherever `reference`
/// currently lives; no other state record exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Source host the archive was uploaded from.
    pub host: String,
    /// Result name, the archive file name without its suffix.
    pub name: String,
    /// Queue-reference inside the stage directory.
    pub reference: PathBuf,
    /// Resolved archive the reference points at.
    pub archive: PathBuf,
    /// Archive size in bytes.
    pub size: u64,
    /// Stage the reference was found in.
    pub stage: Stage,
}

impl Entry {
    /// Checksum sidecar placed next to the archive by the uploader.
    pub fn checksum_path(&self) -> PathBuf {
        let mut path = self.archive.clone().into_os_string();
        path.push(".md5");
        PathBuf::from(path)
    }

    /// Whether the result name carries the duplicate marker.
    pub fn is_duplicate(&self) -> bool {
        self.name.contains(DUPLICATE_MARKER)
    }
}

/// Strips the archive suffix from a file name to obtain the result name.
pub fn result_name(file_name: &str) -> &str {
    ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .filter(|name| !name.is_empty())
        .unwrap_or(file_name)
}

/// Optional placement information embedded in a result.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Sub-path under the host in the published tree.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Owner of the result, for the per-user tree.
    #[serde(default)]
    pub user: Option<String>,
}

/// Configuration for a pipeline run.
///
/// # Example
///
/// ```
/// use benchpipe::PipelineConfig;
///
/// let config = PipelineConfig {
///     archive_root: "/srv/archive".into(),
///     incoming_root: "/srv/incoming".into(),
///     results_root: "/srv/results".into(),
///     users_root: "/srv/users".into(),
///     max_workers: 8,
///     ..PipelineConfig::default()
/// };
/// assert_eq!(config.run_name, "benchpipe-unpack");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-host archives and their stage directories.
    pub archive_root: PathBuf,
    /// Unpacked result trees; temporary workspaces are created here too.
    pub incoming_root: PathBuf,
    /// Published `host/prefix/result` links.
    pub results_root: PathBuf,
    /// Published `user/host/prefix/result` links.
    pub users_root: PathBuf,
    /// Where run summaries are written. Logged only when unset.
    pub report_dir: Option<PathBuf>,
    /// Number of entries processed in parallel (default: 4).
    ///
    /// Unpacking is mostly disk-bound, so going far beyond the number of
    /// spindles rarely helps.
    pub max_workers: usize,
    /// Skip checksum validation of archives (default: false).
    pub skip_verify: bool,
    /// Name tagging the run summary.
    pub run_name: String,
    /// Stage directory names.
    pub stage_dirs: StageDirs,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from("archive"),
            incoming_root: PathBuf::from("incoming"),
            results_root: PathBuf::from("results"),
            users_root: PathBuf::from("users"),
            report_dir: None,
            max_workers: 4,
            skip_verify: false,
            run_name: "benchpipe-unpack".to_string(),
            stage_dirs: StageDirs::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Checks that every required root is an existing directory.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let roots = [
            ("archive", &self.archive_root),
            ("incoming", &self.incoming_root),
            ("results", &self.results_root),
            ("users", &self.users_root),
        ];
        for (name, path) in roots {
            if !path.is_dir() {
                return Err(PipelineError::MissingRoot {
                    name,
                    path: path.clone(),
                });
            }
        }

        if let Some(dir) = &self.report_dir {
            if !dir.is_dir() {
                return Err(PipelineError::MissingRoot {
                    name: "report",
                    path: dir.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Queued;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage);
            assert_eq!(next.index(), stage.index() + 1);
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, Stage::ALL);
    }

    #[test]
    fn test_result_name() {
        assert_eq!(result_name("run-007.tar.gz"), "run-007");
        assert_eq!(result_name("run-007.tgz"), "run-007");
        assert_eq!(result_name("run-007"), "run-007");
        assert_eq!(result_name(".tar.gz"), ".tar.gz");
    }

    #[test]
    fn test_duplicate_marker() {
        let entry = Entry {
            host: "hostA".to_string(),
            name: format!("run-007.{}1", DUPLICATE_MARKER),
            reference: PathBuf::from("/a/hostA/TO-UNPACK/x.tar.gz"),
            archive: PathBuf::from("/a/hostA/x.tar.gz"),
            size: 1,
            stage: Stage::Queued,
        };
        assert!(entry.is_duplicate());
        assert_eq!(entry.checksum_path(), PathBuf::from("/a/hostA/x.tar.gz.md5"));
    }

    #[test]
    fn test_config_partial_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"max_workers": 2, "stage_dirs": {"queued": "IN"}}"#).unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.stage_dirs.name(Stage::Queued), "IN");
        assert_eq!(config.stage_dirs.name(Stage::Unpacked), "TO-COPY-AUX");
        assert_eq!(config.run_name, "benchpipe-unpack");
    }

    #[test]
    fn test_validate_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            archive_root: dir.path().to_path_buf(),
            incoming_root: dir.path().join("nope"),
            results_root: dir.path().to_path_buf(),
            users_root: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        match config.validate() {
            Err(PipelineError::MissingRoot { name, .. }) => assert_eq!(name, "incoming"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_zero_workers() {
        let config = PipelineConfig {
            max_workers: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
