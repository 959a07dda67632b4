//! Operation options, planned actions and the reports they produce.
//!
//! Report `Display` impls render the exact operator-facing text; the structs
//! themselves serialize to JSON for machine consumers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::models::{FileHash, RelativePath};
use crate::three_way::{MergeResult, StatusSummary};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Flags for a pull ("get").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOptions {
    /// Revert local edits to the remote copy instead of keeping or merging them.
    pub overwrite: bool,
    /// Delete local-only files and directories. Requires `overwrite`.
    pub delete_local: bool,
    /// Confirmation bypass, honoured by the caller.
    pub yes: bool,
}

impl PullOptions {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.delete_local && !self.overwrite {
            return Err(SyncError::InvalidOptions(
                "delete_local requires overwrite".into(),
            ));
        }
        Ok(())
    }
}

/// Flags for a push ("update").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOptions {
    pub message: String,
    /// Propagate local deletions to the remote.
    pub delete_remote: bool,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// One step of a pull or push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Bring in a file that is new on the remote or missing locally.
    FetchFile(RelativePath),
    /// Replace the local copy with the remote one.
    RestoreFromRemote(RelativePath),
    /// Record a completed merge; follows the `WriteFile` of its content.
    AutoMerge(RelativePath, MergeResult),
    WriteFile(RelativePath, Vec<u8>),
    /// Both sides diverged on non-text content; the local bytes stay.
    KeepLocal(RelativePath),
    /// Record an untracked file whose content already matches the remote.
    AdoptFile(RelativePath),
    /// Drop a ledger entry for a path gone on both sides.
    ForgetFile(RelativePath),
    CreateLocalDir(RelativePath),
    DeleteLocalFile(RelativePath),
    DeleteLocalDir(RelativePath),
    PushFile(RelativePath),
    DeleteRemoteFile(RelativePath),
}

impl Action {
    pub fn path(&self) -> &str {
        match self {
            Self::FetchFile(p)
            | Self::RestoreFromRemote(p)
            | Self::AutoMerge(p, _)
            | Self::WriteFile(p, _)
            | Self::KeepLocal(p)
            | Self::AdoptFile(p)
            | Self::ForgetFile(p)
            | Self::CreateLocalDir(p)
            | Self::DeleteLocalFile(p)
            | Self::DeleteLocalDir(p)
            | Self::PushFile(p)
            | Self::DeleteRemoteFile(p) => p,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchFile(_) => "fetch_file",
            Self::RestoreFromRemote(_) => "restore_from_remote",
            Self::AutoMerge(_, _) => "auto_merge",
            Self::WriteFile(_, _) => "write_file",
            Self::KeepLocal(_) => "keep_local",
            Self::AdoptFile(_) => "adopt_file",
            Self::ForgetFile(_) => "forget_file",
            Self::CreateLocalDir(_) => "create_local_dir",
            Self::DeleteLocalFile(_) => "delete_local_file",
            Self::DeleteLocalDir(_) => "delete_local_dir",
            Self::PushFile(_) => "push_file",
            Self::DeleteRemoteFile(_) => "delete_remote_file",
        }
    }

    /// `true` for bookkeeping-only actions that never touch files.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::AdoptFile(_) | Self::ForgetFile(_))
    }
}

/// Serializable description of a planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: String,
    pub path: RelativePath,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub conflict: bool,
}

/// Ordered actions for one operation, with the remote content the planner
/// already had to read (merge inputs) and the local hashes its merges saw.
#[derive(Debug, Clone, Default)]
pub struct ActionPlan {
    actions: Vec<Action>,
    remote_content: BTreeMap<RelativePath, Vec<u8>>,
    local_hashes: BTreeMap<RelativePath, FileHash>,
}

impl ActionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn remember_remote(&mut self, path: &str, bytes: Vec<u8>) {
        self.remote_content.insert(path.to_string(), bytes);
    }

    pub fn remote_content(&self, path: &str) -> Option<&[u8]> {
        self.remote_content.get(path).map(Vec::as_slice)
    }

    /// Note the local content a merge was computed from. Applying the plan
    /// later is refused if that file has changed since.
    pub fn remember_local(&mut self, path: &str, hash: FileHash) {
        self.local_hashes.insert(path.to_string(), hash);
    }

    pub fn local_hashes(&self) -> &BTreeMap<RelativePath, FileHash> {
        &self.local_hashes
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// `true` when no action would change anything visible.
    pub fn is_empty(&self) -> bool {
        self.actions.iter().all(Action::is_silent)
    }

    /// Paths the executor must fetch from the remote.
    pub fn fetch_targets(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| {
                matches!(
                    a,
                    Action::FetchFile(_) | Action::RestoreFromRemote(_) | Action::CreateLocalDir(_)
                )
            })
            .map(Action::path)
            .collect()
    }

    pub fn describe(&self) -> Vec<PlannedAction> {
        self.actions
            .iter()
            .filter(|a| !matches!(a, Action::WriteFile(_, _)))
            .map(|a| PlannedAction {
                action: a.kind().to_string(),
                path: a.path().to_string(),
                conflict: matches!(a, Action::AutoMerge(_, r) if r.is_conflict())
                    || matches!(a, Action::KeepLocal(_)),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Pull report
// ---------------------------------------------------------------------------

/// Something a pull did, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "path", rename_all = "snake_case")]
pub enum PullEvent {
    DeletedFile(RelativePath),
    DeletedDir(RelativePath),
    /// New on the remote or missing locally.
    Fetched(RelativePath),
    Restored(RelativePath),
    Merged(RelativePath),
    Conflicted(RelativePath),
    BinaryConflict(RelativePath),
}

/// Outcome of a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    pub recipe: String,
    pub remote_revision: String,
    pub events: Vec<PullEvent>,
}

impl PullReport {
    pub fn new(recipe: &str, remote_revision: &str) -> Self {
        Self {
            recipe: recipe.to_string(),
            remote_revision: remote_revision.to_string(),
            events: Vec::new(),
        }
    }

    pub fn record(&mut self, event: PullEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Paths left with conflict markers (or untouched divergent binaries).
    pub fn conflicts(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PullEvent::Conflicted(p) | PullEvent::BinaryConflict(p) => Some(p.as_str()),
                _ => None,
            })
            .collect()
    }

    fn new_or_missing(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .events
            .iter()
            .filter_map(|e| match e {
                PullEvent::Fetched(p) => Some(p.as_str()),
                _ => None,
            })
            .collect();
        paths.sort_unstable();
        paths
    }
}

impl fmt::Display for PullReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "Nothing to do");
        }

        let mut deletions = 0;
        for event in &self.events {
            match event {
                PullEvent::DeletedFile(p) => writeln!(f, "deleting local file: {p}")?,
                PullEvent::DeletedDir(p) => writeln!(f, "deleting local directory: {p}")?,
                _ => continue,
            }
            deletions += 1;
        }
        if deletions > 0 {
            writeln!(f)?;
        }

        let fetched = self.new_or_missing();
        if !fetched.is_empty() {
            writeln!(f, "{} new or missing files from remote:", fetched.len())?;
            for path in fetched {
                writeln!(f, "\t{path}")?;
            }
        }

        for event in &self.events {
            match event {
                PullEvent::Restored(p) => writeln!(f, "Getting from remote '{p}'")?,
                PullEvent::Merged(p) => writeln!(f, "Auto-merging '{p}'")?,
                PullEvent::Conflicted(p) => {
                    writeln!(f, "Auto-merging '{p}'")?;
                    writeln!(f, "CONFLICT (content): Merge conflict in {p}")?;
                }
                PullEvent::BinaryConflict(p) => {
                    writeln!(f, "Auto-merging '{p}'")?;
                    writeln!(f, "CONFLICT (binary): Merge conflict in {p}")?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A dry-run pull: the plan plus the remote revision it was computed against.
#[derive(Debug, Clone)]
pub struct PullPreview {
    pub recipe: String,
    pub dir: std::path::PathBuf,
    pub options: PullOptions,
    pub remote_revision: String,
    pub fresh_checkout: bool,
    pub plan: ActionPlan,
}

impl PullPreview {
    pub fn describe(&self) -> Vec<PlannedAction> {
        self.plan.describe()
    }
}

// ---------------------------------------------------------------------------
// Push report
// ---------------------------------------------------------------------------

/// A per-file push failure. Siblings still go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushIssue {
    pub path: RelativePath,
    pub detail: String,
}

/// Outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub recipe: String,
    pub new_files: Vec<RelativePath>,
    pub updated_files: Vec<RelativePath>,
    pub deleted_files: Vec<RelativePath>,
    pub issues: Vec<PushIssue>,
}

impl PushReport {
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Update results:")?;
        writeln!(f)?;
        for (title, paths) in [
            ("New files", &self.new_files),
            ("Updated files", &self.updated_files),
            ("Deleted files", &self.deleted_files),
        ] {
            writeln!(f, "{title}:")?;
            if paths.is_empty() {
                writeln!(f, "\tNone")?;
            }
            for path in paths {
                writeln!(f, "\t{path}")?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Issues:")?;
        writeln!(f)?;
        if self.issues.is_empty() {
            return write!(f, "No issues found");
        }
        let lines: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("\t{}: {}", i.path, i.detail))
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Single-file operations
// ---------------------------------------------------------------------------

/// Outcome of a single-file get, update or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", content = "path", rename_all = "snake_case")]
pub enum FileChange {
    Fetched(RelativePath),
    Added(RelativePath),
    Updated(RelativePath),
    /// Local and remote already held the same content.
    Unchanged(RelativePath),
    Deleted(RelativePath),
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            Self::Fetched(p)
            | Self::Added(p)
            | Self::Updated(p)
            | Self::Unchanged(p)
            | Self::Deleted(p) => p,
        }
    }
}

impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetched(p) => write!(f, "Getting from remote '{p}'"),
            Self::Added(p) => write!(f, "Added '{p}' to the remote"),
            Self::Updated(p) => write!(f, "Updated '{p}' on the remote"),
            Self::Unchanged(p) => write!(f, "'{p}' is already up to date"),
            Self::Deleted(p) => write!(f, "Deleted '{p}' from the remote"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status report
// ---------------------------------------------------------------------------

/// Outcome of a status check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub recipe: String,
    pub summary: StatusSummary,
    pub remote_revision: String,
    pub orig_head: Option<String>,
}

impl StatusReport {
    /// `true` when the remote changed since this working copy last synced.
    pub fn remote_moved(&self) -> bool {
        self.orig_head.as_deref() != Some(self.remote_revision.as_str())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Unified diff of one file, remote → local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: RelativePath,
    pub patch: String,
}
