//! Three-way classification of a working copy.
//!
//! Given the base (ledger), local and remote manifests, every path known to
//! any of them is assigned exactly one [`SyncStatus`]. Files and directories
//! are classified in separate namespaces; directories carry presence only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ledger::ContentHashLedger;
use crate::models::{FileHash, Manifest, RelativePath};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-path synchronization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Same content in base, local and remote (or directory on both sides).
    Unchanged,
    /// Only the local side has it: new and never pushed, or deleted remotely.
    LocalOnly,
    /// Only the remote side has it: new remotely, or deleted locally.
    RemoteOnly,
    /// Local edit since the last sync; remote untouched.
    ModifiedLocal,
    /// Remote edit since the last sync; local untouched.
    ModifiedRemote,
    /// Both sides diverged from the base.
    ModifiedBoth,
    /// Gone on both sides; only the ledger still remembers it.
    Removed,
    /// Directory present locally only.
    LocalOnlyDir,
    /// Directory present remotely only.
    RemoteOnlyDir,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::LocalOnly => write!(f, "local_only"),
            Self::RemoteOnly => write!(f, "remote_only"),
            Self::ModifiedLocal => write!(f, "modified_local"),
            Self::ModifiedRemote => write!(f, "modified_remote"),
            Self::ModifiedBoth => write!(f, "modified_both"),
            Self::Removed => write!(f, "removed"),
            Self::LocalOnlyDir => write!(f, "local_only_dir"),
            Self::RemoteOnlyDir => write!(f, "remote_only_dir"),
        }
    }
}

/// The status of every file and directory in one sync snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub files: BTreeMap<RelativePath, SyncStatus>,
    pub dirs: BTreeMap<RelativePath, SyncStatus>,
}

impl Classification {
    /// File paths with the given status, sorted.
    pub fn files_with(&self, status: SyncStatus) -> Vec<&str> {
        self.files
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Directory paths with the given status, sorted.
    pub fn dirs_with(&self, status: SyncStatus) -> Vec<&str> {
        self.dirs
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Files the remote changed since the last sync (push precondition).
    pub fn remote_changes(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|(_, s)| matches!(s, SyncStatus::ModifiedRemote | SyncStatus::ModifiedBoth))
            .map(|(p, _)| p.as_str())
            .collect()
    }

    pub fn summary(&self) -> StatusSummary {
        let owned = |v: Vec<&str>| v.into_iter().map(str::to_string).collect();
        StatusSummary {
            unchanged: self.files_with(SyncStatus::Unchanged).len(),
            modified_local: owned(self.files_with(SyncStatus::ModifiedLocal)),
            modified_remote: owned(self.files_with(SyncStatus::ModifiedRemote)),
            modified_both: owned(self.files_with(SyncStatus::ModifiedBoth)),
            local_only_files: owned(self.files_with(SyncStatus::LocalOnly)),
            local_only_dirs: owned(self.dirs_with(SyncStatus::LocalOnlyDir)),
            remote_only_files: owned(self.files_with(SyncStatus::RemoteOnly)),
            remote_only_dirs: owned(self.dirs_with(SyncStatus::RemoteOnlyDir)),
        }
    }
}

// ---------------------------------------------------------------------------
// Grouped report
// ---------------------------------------------------------------------------

/// Grouped status categories, rendered as the recipe status report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub unchanged: usize,
    pub modified_local: Vec<RelativePath>,
    pub modified_remote: Vec<RelativePath>,
    pub modified_both: Vec<RelativePath>,
    pub local_only_files: Vec<RelativePath>,
    pub local_only_dirs: Vec<RelativePath>,
    pub remote_only_files: Vec<RelativePath>,
    pub remote_only_dirs: Vec<RelativePath>,
}

impl StatusSummary {
    /// `true` when every file is unchanged and no directory is one-sided.
    pub fn is_clean(&self) -> bool {
        self.modified_local.is_empty()
            && self.modified_remote.is_empty()
            && self.modified_both.is_empty()
            && self.local_only_files.is_empty()
            && self.local_only_dirs.is_empty()
            && self.remote_only_files.is_empty()
            && self.remote_only_dirs.is_empty()
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections: [(&str, &str, &Vec<RelativePath>); 7] = [
            ("files", "are modified on local", &self.modified_local),
            ("files", "are modified on remote", &self.modified_remote),
            ("files", "are modified on both local and remote", &self.modified_both),
            ("files", "are local only", &self.local_only_files),
            ("directories", "are local only", &self.local_only_dirs),
            ("files", "are remote only", &self.remote_only_files),
            ("directories", "are remote only", &self.remote_only_dirs),
        ];
        for (noun, what, paths) in sections {
            if paths.is_empty() {
                continue;
            }
            writeln!(f, "{} {noun} {what}:", paths.len())?;
            for path in paths {
                writeln!(f, "\t{path}")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "{} files are unchanged", self.unchanged)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Stateless three-way classifier.
pub struct ThreeWayClassifier;

impl ThreeWayClassifier {
    /// Classify every path in the union of `base`, `local` and `remote`.
    pub fn classify(
        base: &ContentHashLedger,
        local: &Manifest,
        remote: &Manifest,
    ) -> Classification {
        let mut result = Classification::default();

        let file_paths: BTreeSet<&RelativePath> = base
            .entries()
            .keys()
            .chain(local.files.keys())
            .chain(remote.files.keys())
            .collect();

        for path in file_paths {
            let status = classify_file(
                base.get(path),
                local.file_hash(path),
                remote.file_hash(path),
            );
            debug!(path = path.as_str(), status = %status, "classified file");
            result.files.insert(path.clone(), status);
        }

        for path in local.dirs.union(&remote.dirs) {
            let status = match (local.has_dir(path), remote.has_dir(path)) {
                (true, true) => SyncStatus::Unchanged,
                (true, false) => SyncStatus::LocalOnlyDir,
                _ => SyncStatus::RemoteOnlyDir,
            };
            result.dirs.insert(path.clone(), status);
        }

        info!(
            files = result.files.len(),
            dirs = result.dirs.len(),
            "three-way classification complete"
        );
        result
    }
}

/// Decision table for one file path. At least one side must hold the path.
fn classify_file(
    base: Option<&FileHash>,
    local: Option<&FileHash>,
    remote: Option<&FileHash>,
) -> SyncStatus {
    match (base, local, remote) {
        (Some(b), Some(l), Some(r)) if l == b && r == b => SyncStatus::Unchanged,
        (None, Some(_), None) => SyncStatus::LocalOnly,
        (None, None, Some(_)) => SyncStatus::RemoteOnly,
        // Delete propagation: the surviving side wins.
        (Some(_), Some(_), None) => SyncStatus::LocalOnly,
        (Some(_), None, Some(_)) => SyncStatus::RemoteOnly,
        (Some(b), Some(l), Some(_)) if l == b => SyncStatus::ModifiedRemote,
        (Some(b), Some(_), Some(r)) if r == b => SyncStatus::ModifiedLocal,
        (Some(_), Some(_), Some(_)) => SyncStatus::ModifiedBoth,
        // No base entry: untracked, even when both sides happen to match.
        (None, Some(l), Some(r)) if l == r => SyncStatus::LocalOnly,
        (None, Some(_), Some(_)) => SyncStatus::ModifiedBoth,
        (Some(_), None, None) | (None, None, None) => SyncStatus::Removed,
    }
}
