//! Recipe synchronization engine.
//!
//! The [`SyncEngine`] drives every operation on a working copy through the
//! same phases:
//!
//! 1. Scan the local tree, load the ledger, read the remote manifest.
//! 2. Classify every path three ways.
//! 3. Plan the actions for the requested operation.
//! 4. Execute them, updating the ledger and base snapshots as they land.
//! 5. Report.
//!
//! A lock flag prevents two operations from running on one engine at once.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::errors::{CoreError, RemoteError, SyncError};
use crate::ledger::ContentHashLedger;
use crate::models::{depth, is_ancestor, normalize_path, FileHash, Manifest, RelativePath};
use crate::plan::{
    Action, ActionPlan, FileChange, FileDiff, PullEvent, PullOptions, PullPreview, PullReport,
    PushIssue, PushOptions, PushReport, StatusReport,
};
use crate::reducer::PathSetReducer;
use crate::remote::RecipeRemote;
use crate::scanner::{IgnoreRules, TreeScanner};
use crate::snapshots::SnapshotStore;
use crate::three_way::{Classification, MergeEngine, SyncStatus, ThreeWayClassifier};
use crate::working_copy::{RecipeMeta, WorkingCopy};

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Phases of one operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Start,
    Classified,
    Planned,
    Executed,
    Reported,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Classified => write!(f, "classified"),
            Self::Planned => write!(f, "planned"),
            Self::Executed => write!(f, "executed"),
            Self::Reported => write!(f, "reported"),
        }
    }
}

/// What to plan for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    Pull(PullOptions),
    Push(PushOptions),
}

/// Everything observed before any mutation.
struct Snapshot {
    ledger: ContentHashLedger,
    remote: Manifest,
    revision: String,
    classification: Classification,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Pulls, pushes and inspects recipe working copies against one remote.
pub struct SyncEngine<R> {
    remote: R,
    scanner: TreeScanner,
    metadata_dir: String,
    keep_base_snapshots: bool,
    /// Set while an operation is in flight.
    running: AtomicBool,
    started_at: Mutex<DateTime<Utc>>,
}

impl<R: RecipeRemote> SyncEngine<R> {
    pub fn new(remote: R, config: &SyncConfig) -> Self {
        info!(metadata_dir = config.metadata_dir.as_str(), "initializing sync engine");
        let scanner = TreeScanner::new(
            config.metadata_dir.clone(),
            IgnoreRules::new(config.ignore_patterns.clone()),
        );
        Self {
            remote,
            scanner,
            metadata_dir: config.metadata_dir.clone(),
            keep_base_snapshots: config.keep_base_snapshots,
            running: AtomicBool::new(false),
            started_at: Mutex::new(Utc::now()),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn working_copy(&self, dir: &Path) -> WorkingCopy {
        WorkingCopy::new(dir, &self.metadata_dir)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<SyncLockGuard<'_>, SyncError> {
        let mut started_at = self.started_at.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning {
                started_at: started_at.to_rfc3339(),
            });
        }
        *started_at = Utc::now();
        Ok(SyncLockGuard(&self.running))
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Classify the working copy against the remote without changing anything.
    pub fn status(&self, recipe: &str, dir: &Path) -> Result<StatusReport, SyncError> {
        let wc = self.working_copy(dir);
        wc.ensure_working_copy()?;
        check_recipe(&wc, recipe)?;

        let snapshot = self.snapshot(recipe, &wc)?;
        let report = StatusReport {
            recipe: recipe.to_string(),
            summary: snapshot.classification.summary(),
            remote_revision: snapshot.revision,
            orig_head: snapshot.ledger.orig_head().map(str::to_string),
        };
        info!(recipe, clean = report.summary.is_clean(), "recipe status computed");
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Plan an operation without executing it.
    pub fn plan(&self, recipe: &str, dir: &Path, mode: &SyncMode) -> Result<ActionPlan, SyncError> {
        match mode {
            SyncMode::Pull(options) => Ok(self.preview_pull(recipe, dir, options)?.plan),
            SyncMode::Push(options) => {
                let wc = self.working_copy(dir);
                wc.ensure_working_copy()?;
                check_recipe(&wc, recipe)?;
                let snapshot = self.snapshot(recipe, &wc)?;
                self.plan_push(&snapshot, options)
            }
        }
    }

    /// Classify and plan a pull, capturing the remote revision it saw.
    pub fn preview_pull(
        &self,
        recipe: &str,
        dir: &Path,
        options: &PullOptions,
    ) -> Result<PullPreview, SyncError> {
        options.validate()?;
        let wc = self.working_copy(dir);

        let fresh_checkout = !wc.has_metadata();
        if fresh_checkout && !wc.is_empty_dir()? {
            return Err(SyncError::NotARecipeWorkingCopy(dir.to_path_buf()));
        }
        check_recipe(&wc, recipe)?;
        debug!(recipe, phase = %SyncPhase::Start, fresh_checkout, "pull");

        let snapshot = self.snapshot(recipe, &wc)?;
        let plan = self.plan_pull(recipe, &wc, &snapshot, options)?;
        debug!(recipe, phase = %SyncPhase::Planned, actions = plan.len(), "pull");

        Ok(PullPreview {
            recipe: recipe.to_string(),
            dir: dir.to_path_buf(),
            options: options.clone(),
            remote_revision: snapshot.revision,
            fresh_checkout,
            plan,
        })
    }

    fn plan_pull(
        &self,
        recipe: &str,
        wc: &WorkingCopy,
        snapshot: &Snapshot,
        options: &PullOptions,
    ) -> Result<ActionPlan, SyncError> {
        let c = &snapshot.classification;
        let mut plan = ActionPlan::new();

        if options.overwrite && options.delete_local {
            for path in c.files_with(SyncStatus::LocalOnly) {
                if snapshot.remote.file_hash(path).is_none() {
                    plan.push(Action::DeleteLocalFile(path.to_string()));
                }
            }
            let mut dirs = c.dirs_with(SyncStatus::LocalOnlyDir);
            dirs.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
            for dir in dirs {
                plan.push(Action::DeleteLocalDir(dir.to_string()));
            }
        }

        for dir in c.dirs_with(SyncStatus::RemoteOnlyDir) {
            plan.push(Action::CreateLocalDir(dir.to_string()));
        }
        for path in c.files_with(SyncStatus::RemoteOnly) {
            plan.push(Action::FetchFile(path.to_string()));
        }

        for (path, status) in &c.files {
            match status {
                SyncStatus::ModifiedRemote => plan.push(Action::RestoreFromRemote(path.clone())),
                SyncStatus::ModifiedLocal | SyncStatus::ModifiedBoth if options.overwrite => {
                    plan.push(Action::RestoreFromRemote(path.clone()))
                }
                SyncStatus::ModifiedBoth => {
                    self.plan_merge(recipe, wc, &snapshot.ledger, path, &mut plan)?
                }
                SyncStatus::LocalOnly if snapshot.remote.file_hash(path).is_some() => {
                    plan.push(Action::AdoptFile(path.clone()))
                }
                SyncStatus::Removed => plan.push(Action::ForgetFile(path.clone())),
                _ => {}
            }
        }
        Ok(plan)
    }

    /// Merge one both-modified file now so the plan carries the outcome.
    fn plan_merge(
        &self,
        recipe: &str,
        wc: &WorkingCopy,
        ledger: &ContentHashLedger,
        path: &str,
        plan: &mut ActionPlan,
    ) -> Result<(), SyncError> {
        let remote = self.remote.fetch(recipe, path)?;
        let local = wc.read_file(path)?;
        let base = match ledger.get(path) {
            Some(hash) => wc.snapshots().get(hash)?,
            None => Some(Vec::new()),
        };
        let base = base.unwrap_or_else(|| {
            warn!(path, "base snapshot missing, merging against empty base");
            Vec::new()
        });

        match (
            std::str::from_utf8(&base),
            std::str::from_utf8(&local),
            std::str::from_utf8(&remote),
        ) {
            (Ok(base), Ok(local), Ok(remote_text)) => {
                let result = MergeEngine::merge(base, local, remote_text);
                debug!(path, conflict = result.is_conflict(), "planned auto-merge");
                plan.push(Action::WriteFile(
                    path.to_string(),
                    result.content().as_bytes().to_vec(),
                ));
                plan.push(Action::AutoMerge(path.to_string(), result));
            }
            _ => {
                debug!(path, "non-text content diverged, keeping local");
                plan.push(Action::KeepLocal(path.to_string()));
            }
        }
        plan.remember_remote(path, remote);
        plan.remember_local(path, FileHash::of(&local));
        Ok(())
    }

    fn plan_push(&self, snapshot: &Snapshot, options: &PushOptions) -> Result<ActionPlan, SyncError> {
        let c = &snapshot.classification;
        let stale = c.remote_changes();
        if !stale.is_empty() {
            warn!(count = stale.len(), "push refused, remote has unseen changes");
            return Err(SyncError::StaleMergePreview {
                paths: stale.into_iter().map(str::to_string).collect(),
            });
        }

        let mut plan = ActionPlan::new();
        for (path, status) in &c.files {
            let tracked = snapshot.ledger.contains(path);
            match status {
                SyncStatus::LocalOnly if tracked => {
                    warn!(path = path.as_str(), "deleted on remote since last sync, not pushing");
                }
                SyncStatus::LocalOnly if snapshot.remote.file_hash(path).is_some() => {
                    plan.push(Action::AdoptFile(path.clone()))
                }
                SyncStatus::LocalOnly | SyncStatus::ModifiedLocal => {
                    plan.push(Action::PushFile(path.clone()))
                }
                SyncStatus::RemoteOnly if tracked && options.delete_remote => {
                    plan.push(Action::DeleteRemoteFile(path.clone()))
                }
                SyncStatus::Removed => plan.push(Action::ForgetFile(path.clone())),
                _ => {}
            }
        }
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    /// Bring remote changes into the working copy at `dir`.
    ///
    /// A missing or empty `dir` becomes a fresh checkout. Conflicts are part
    /// of a successful report. A failing action stops the pull; the error
    /// carries the report of what was applied before it.
    pub fn pull(&self, recipe: &str, dir: &Path, options: &PullOptions) -> Result<PullReport, SyncError> {
        let _guard = self.acquire()?;
        info!(recipe, dir = %dir.display(), ?options, "starting pull");
        let preview = self.preview_pull(recipe, dir, options)?;
        self.execute_pull(&preview)
    }

    /// Execute a preview, provided the remote has not moved since.
    pub fn apply_preview(&self, preview: &PullPreview) -> Result<PullReport, SyncError> {
        let _guard = self.acquire()?;
        let actual = self.remote.revision(&preview.recipe)?;
        if actual != preview.remote_revision {
            warn!(
                recipe = preview.recipe.as_str(),
                expected = preview.remote_revision.as_str(),
                actual = actual.as_str(),
                "remote moved since preview"
            );
            return Err(SyncError::RemoteMoved {
                expected: preview.remote_revision.clone(),
                actual,
            });
        }
        self.check_local_unchanged(preview)?;
        self.execute_pull(preview)
    }

    /// Merged content was computed from the local bytes seen at preview
    /// time; writing it over newer edits would lose them.
    fn check_local_unchanged(&self, preview: &PullPreview) -> Result<(), SyncError> {
        let wc = self.working_copy(&preview.dir);
        for (path, expected) in preview.plan.local_hashes() {
            let current = wc.read_file(path).ok().map(|bytes| FileHash::of(&bytes));
            if current.as_ref() != Some(expected) {
                warn!(path = path.as_str(), "local file changed since preview");
                return Err(SyncError::LocalChanged(path.clone()));
            }
        }
        Ok(())
    }

    fn execute_pull(&self, preview: &PullPreview) -> Result<PullReport, SyncError> {
        let recipe = preview.recipe.as_str();
        let wc = self.working_copy(&preview.dir);
        std::fs::create_dir_all(wc.root())?;

        let mut ledger = wc.load_ledger()?;
        let store = wc.snapshots();
        let mut report = PullReport::new(recipe, &preview.remote_revision);

        let mut fetched = match self.prefetch(recipe, &preview.plan) {
            Ok(files) => files,
            Err((path, source)) => return Err(interrupted(&report, &path, source)),
        };

        for action in preview.plan.actions() {
            let outcome =
                self.apply_pull_action(recipe, &wc, &mut ledger, &store, &mut fetched, preview, action);
            match outcome {
                Ok(Some(event)) => report.record(event),
                Ok(None) => {}
                Err(source) => {
                    warn!(path = action.path(), error = %source, "pull interrupted");
                    if let Err(e) = ledger.save(wc.meta_dir()) {
                        warn!(error = %e, "failed to save partial ledger");
                    }
                    return Err(interrupted(&report, action.path(), source));
                }
            }
        }
        debug!(recipe, phase = %SyncPhase::Executed, "pull");

        ledger.set_orig_head(preview.remote_revision.as_str());
        self.finish(recipe, &wc, &ledger)?;

        info!(
            recipe,
            events = report.events.len(),
            conflicts = report.conflicts().len(),
            phase = %SyncPhase::Reported,
            "pull complete"
        );
        Ok(report)
    }

    /// Fetch everything the plan needs from the remote, one call per
    /// reduced root.
    fn prefetch(
        &self,
        recipe: &str,
        plan: &ActionPlan,
    ) -> Result<BTreeMap<RelativePath, Vec<u8>>, (String, SyncError)> {
        let files: BTreeSet<&str> = plan
            .actions()
            .iter()
            .filter(|a| matches!(a, Action::FetchFile(_) | Action::RestoreFromRemote(_)))
            .map(Action::path)
            .collect();
        let roots = PathSetReducer::reduce(plan.fetch_targets());

        let mut fetched = BTreeMap::new();
        for root in roots {
            let result = if files.contains(root.as_str()) {
                self.remote
                    .fetch(recipe, &root)
                    .map(|bytes| fetched.extend([(root.clone(), bytes)]))
            } else {
                self.remote
                    .fetch_subtree(recipe, &root)
                    .map(|subtree| fetched.extend(subtree))
            };
            result.map_err(|e| (root.clone(), SyncError::from(e)))?;
        }
        debug!(recipe, files = fetched.len(), "prefetched remote content");
        Ok(fetched)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_pull_action(
        &self,
        recipe: &str,
        wc: &WorkingCopy,
        ledger: &mut ContentHashLedger,
        store: &SnapshotStore,
        fetched: &mut BTreeMap<RelativePath, Vec<u8>>,
        preview: &PullPreview,
        action: &Action,
    ) -> Result<Option<PullEvent>, SyncError> {
        let event = match action {
            Action::FetchFile(path) | Action::RestoreFromRemote(path) => {
                let bytes = match fetched.remove(path) {
                    Some(bytes) => bytes,
                    None => self.remote.fetch(recipe, path)?,
                };
                wc.write_file(path, &bytes)?;
                self.record(ledger, store, path, &bytes)?;
                debug!(path = path.as_str(), kind = action.kind(), "wrote remote content");
                match action {
                    Action::FetchFile(_) => Some(PullEvent::Fetched(path.clone())),
                    _ => Some(PullEvent::Restored(path.clone())),
                }
            }
            Action::WriteFile(path, bytes) => {
                wc.write_file(path, bytes)?;
                None
            }
            Action::AutoMerge(path, result) => {
                self.record_remote_base(ledger, store, preview, path)?;
                if result.is_conflict() {
                    Some(PullEvent::Conflicted(path.clone()))
                } else {
                    Some(PullEvent::Merged(path.clone()))
                }
            }
            Action::KeepLocal(path) => {
                self.record_remote_base(ledger, store, preview, path)?;
                Some(PullEvent::BinaryConflict(path.clone()))
            }
            Action::AdoptFile(path) => {
                let bytes = wc.read_file(path)?;
                self.record(ledger, store, path, &bytes)?;
                None
            }
            Action::ForgetFile(path) => {
                ledger.remove(path);
                None
            }
            Action::CreateLocalDir(path) => {
                wc.create_dir(path)?;
                None
            }
            Action::DeleteLocalFile(path) => {
                wc.delete_file(path)?;
                ledger.remove(path);
                Some(PullEvent::DeletedFile(path.clone()))
            }
            Action::DeleteLocalDir(path) => {
                let abs = wc.abs(path);
                if std::fs::read_dir(&abs)?.next().is_some() {
                    warn!(path = path.as_str(), "directory still holds ignored entries, keeping it");
                    None
                } else {
                    wc.delete_dir(path)?;
                    Some(PullEvent::DeletedDir(path.clone()))
                }
            }
            Action::PushFile(_) | Action::DeleteRemoteFile(_) => {
                warn!(path = action.path(), kind = action.kind(), "push action in a pull plan, skipping");
                None
            }
        };
        Ok(event)
    }

    /// After a merge the ledger points at the remote version, so the merged
    /// result shows up as a local modification.
    fn record_remote_base(
        &self,
        ledger: &mut ContentHashLedger,
        store: &SnapshotStore,
        preview: &PullPreview,
        path: &str,
    ) -> Result<(), SyncError> {
        match preview.plan.remote_content(path) {
            Some(remote) => {
                self.record(ledger, store, path, remote)?;
            }
            None => warn!(path, "merged without remote content on record"),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Send local changes to the remote.
    ///
    /// Refused up front when the remote has changes this working copy has
    /// not pulled. Per-file failures become issues in the report.
    pub fn push(&self, recipe: &str, dir: &Path, options: &PushOptions) -> Result<PushReport, SyncError> {
        let _guard = self.acquire()?;
        info!(recipe, dir = %dir.display(), delete_remote = options.delete_remote, "starting push");

        let wc = self.working_copy(dir);
        wc.ensure_working_copy()?;
        check_recipe(&wc, recipe)?;

        let snapshot = self.snapshot(recipe, &wc)?;
        let plan = self.plan_push(&snapshot, options)?;
        debug!(recipe, phase = %SyncPhase::Planned, actions = plan.len(), "push");

        let mut ledger = snapshot.ledger;
        let store = wc.snapshots();
        let mut report = PushReport {
            recipe: recipe.to_string(),
            ..Default::default()
        };

        for action in plan.actions() {
            let path = action.path();
            let result = match action {
                Action::PushFile(_) => {
                    let is_new = !ledger.contains(path);
                    self.push_file(recipe, &wc, &mut ledger, &store, path, &options.message)
                        .map(|()| {
                            if is_new {
                                report.new_files.push(path.to_string());
                            } else {
                                report.updated_files.push(path.to_string());
                            }
                        })
                }
                Action::DeleteRemoteFile(_) => self
                    .remote
                    .delete(recipe, path, &options.message)
                    .map_err(SyncError::from)
                    .map(|()| {
                        ledger.remove(path);
                        report.deleted_files.push(path.to_string());
                    }),
                Action::AdoptFile(_) => wc
                    .read_file(path)
                    .map_err(SyncError::from)
                    .and_then(|bytes| self.record(&mut ledger, &store, path, &bytes)),
                Action::ForgetFile(_) => {
                    ledger.remove(path);
                    Ok(())
                }
                other => {
                    warn!(path, kind = other.kind(), "pull action in a push plan, skipping");
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!(path, error = %e, "push of file failed");
                report.issues.push(PushIssue {
                    path: path.to_string(),
                    detail: e.to_string(),
                });
            }
        }
        let mut dirs = snapshot.classification.dirs_with(SyncStatus::LocalOnlyDir);
        dirs.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
        for dir in dirs {
            if let Err(e) = remove_if_empty(&wc, dir) {
                warn!(path = dir, error = %e, "could not remove empty local directory");
                report.issues.push(PushIssue {
                    path: dir.to_string(),
                    detail: e.to_string(),
                });
            }
        }
        debug!(recipe, phase = %SyncPhase::Executed, "push");

        match self.remote.revision(recipe) {
            Ok(revision) => ledger.set_orig_head(revision),
            Err(e) => warn!(error = %e, "could not read remote revision after push"),
        }
        self.finish(recipe, &wc, &ledger)?;

        info!(
            recipe,
            new = report.new_files.len(),
            updated = report.updated_files.len(),
            deleted = report.deleted_files.len(),
            issues = report.issues.len(),
            phase = %SyncPhase::Reported,
            "push complete"
        );
        Ok(report)
    }

    fn push_file(
        &self,
        recipe: &str,
        wc: &WorkingCopy,
        ledger: &mut ContentHashLedger,
        store: &SnapshotStore,
        path: &str,
        message: &str,
    ) -> Result<(), SyncError> {
        let bytes = wc.read_file(path)?;
        self.remote.push(recipe, path, &bytes, message)?;
        self.record(ledger, store, path, &bytes)?;
        debug!(path, "pushed file");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Single files
    // -----------------------------------------------------------------------

    /// Replace one local file with the remote copy, whatever its local state.
    ///
    /// The ledger and base snapshot follow the fetched content. `ORIG_HEAD`
    /// is left alone since other files may still lag the remote.
    pub fn get_file(&self, recipe: &str, dir: &Path, path: &str) -> Result<FileChange, SyncError> {
        let _guard = self.acquire()?;
        let (wc, path) = self.single_file(recipe, dir, path)?;
        info!(recipe, path = path.as_str(), "getting file");

        if wc.abs(&path).is_dir() {
            return Err(SyncError::PathKindMismatch(path));
        }
        let bytes = self.remote.fetch(recipe, &path)?;
        let mut ledger = wc.load_ledger()?;
        wc.write_file(&path, &bytes)?;
        self.record(&mut ledger, &wc.snapshots(), &path, &bytes)?;
        self.finish(recipe, &wc, &ledger)?;

        Ok(FileChange::Fetched(path))
    }

    /// Send one local file to the remote, adding it there if new.
    ///
    /// Refused with [`SyncError::StaleMergePreview`] when the remote copy
    /// changed since this working copy last saw it.
    pub fn update_file(
        &self,
        recipe: &str,
        dir: &Path,
        path: &str,
        message: &str,
    ) -> Result<FileChange, SyncError> {
        let _guard = self.acquire()?;
        let (wc, path) = self.single_file(recipe, dir, path)?;
        info!(recipe, path = path.as_str(), "updating file");

        if !wc.abs(&path).is_file() {
            return Err(SyncError::MissingLocalFile(path));
        }
        let bytes = wc.read_file(&path)?;
        let local = FileHash::of(&bytes);

        let mut ledger = wc.load_ledger()?;
        let revision = self.remote.revision(recipe)?;
        let remote = self.remote.manifest(recipe)?;
        if remote.has_dir(&path) {
            return Err(SyncError::PathKindMismatch(path));
        }
        let theirs = remote.file_hash(&path);

        let change = if theirs == Some(&local) {
            debug!(path = path.as_str(), "remote already holds local content");
            FileChange::Unchanged(path.clone())
        } else {
            if theirs != ledger.get(&path) {
                warn!(path = path.as_str(), "update refused, remote copy changed");
                return Err(SyncError::StaleMergePreview { paths: vec![path] });
            }
            self.remote.push(recipe, &path, &bytes, message)?;
            if theirs.is_none() {
                FileChange::Added(path.clone())
            } else {
                FileChange::Updated(path.clone())
            }
        };
        self.record(&mut ledger, &wc.snapshots(), &path, &bytes)?;
        self.advance_head(recipe, &mut ledger, &revision);
        self.finish(recipe, &wc, &ledger)?;

        Ok(change)
    }

    /// Delete one file from the remote and stop tracking it. A local copy,
    /// if present, is removed too.
    pub fn delete_file(
        &self,
        recipe: &str,
        dir: &Path,
        path: &str,
        message: &str,
    ) -> Result<FileChange, SyncError> {
        let _guard = self.acquire()?;
        let (wc, path) = self.single_file(recipe, dir, path)?;
        info!(recipe, path = path.as_str(), "deleting file");

        let mut ledger = wc.load_ledger()?;
        let revision = self.remote.revision(recipe)?;
        let remote = self.remote.manifest(recipe)?;
        let Some(theirs) = remote.file_hash(&path) else {
            return Err(RemoteError::FileNotFound {
                recipe: recipe.to_string(),
                path,
            }
            .into());
        };

        let local = wc
            .abs(&path)
            .is_file()
            .then(|| wc.read_file(&path).map(|bytes| FileHash::of(&bytes)))
            .transpose()?;
        if ledger.get(&path) != Some(theirs) && local.as_ref() != Some(theirs) {
            warn!(path = path.as_str(), "delete refused, remote copy not yet seen locally");
            return Err(SyncError::StaleMergePreview { paths: vec![path] });
        }

        self.remote.delete(recipe, &path, message)?;
        ledger.remove(&path);
        if local.is_some() {
            wc.delete_file(&path)?;
            debug!(path = path.as_str(), "deleted local copy");
        }
        self.advance_head(recipe, &mut ledger, &revision);
        self.finish(recipe, &wc, &ledger)?;

        Ok(FileChange::Deleted(path))
    }

    fn single_file(
        &self,
        recipe: &str,
        dir: &Path,
        path: &str,
    ) -> Result<(WorkingCopy, RelativePath), SyncError> {
        let wc = self.working_copy(dir);
        wc.ensure_working_copy()?;
        check_recipe(&wc, recipe)?;
        Ok((wc, normalize_path(path)?))
    }

    /// Move `ORIG_HEAD` past our own remote change, but only if the working
    /// copy was current with the remote before it.
    fn advance_head(&self, recipe: &str, ledger: &mut ContentHashLedger, before: &str) {
        if ledger.orig_head() != Some(before) {
            return;
        }
        match self.remote.revision(recipe) {
            Ok(revision) => ledger.set_orig_head(revision),
            Err(e) => warn!(error = %e, "could not read remote revision after change"),
        }
    }

    // -----------------------------------------------------------------------
    // Diff
    // -----------------------------------------------------------------------

    /// Unified diffs (remote → local) of modified files, optionally limited
    /// to `paths` and anything beneath them.
    pub fn diff(&self, recipe: &str, dir: &Path, paths: &[String]) -> Result<Vec<FileDiff>, SyncError> {
        let wc = self.working_copy(dir);
        wc.ensure_working_copy()?;
        check_recipe(&wc, recipe)?;

        let filters = paths
            .iter()
            .map(|p| normalize_path(p))
            .collect::<Result<Vec<_>, _>>()?;
        let wanted = |path: &str| {
            filters.is_empty() || filters.iter().any(|f| f == path || is_ancestor(f, path))
        };

        let snapshot = self.snapshot(recipe, &wc)?;
        let mut diffs = Vec::new();
        for (path, status) in &snapshot.classification.files {
            let modified = matches!(
                status,
                SyncStatus::ModifiedLocal | SyncStatus::ModifiedRemote | SyncStatus::ModifiedBoth
            );
            if !modified || !wanted(path.as_str()) {
                continue;
            }
            let remote = self.remote.fetch(recipe, path)?;
            let local = wc.read_file(path)?;
            let patch = match (std::str::from_utf8(&remote), std::str::from_utf8(&local)) {
                (Ok(remote), Ok(local)) => diffy::create_patch(remote, local).to_string(),
                _ => "Binary files differ\n".to_string(),
            };
            diffs.push(FileDiff {
                path: path.clone(),
                patch,
            });
        }
        info!(recipe, files = diffs.len(), "computed diffs");
        Ok(diffs)
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    fn snapshot(&self, recipe: &str, wc: &WorkingCopy) -> Result<Snapshot, SyncError> {
        let ledger = wc.load_ledger()?;
        let local = self.scanner.scan(wc.root())?;
        let revision = self.remote.revision(recipe)?;
        let remote = self.remote.manifest(recipe)?;

        if let Some(path) = local.kind_mismatches(&remote).into_iter().next() {
            return Err(SyncError::PathKindMismatch(path));
        }

        let classification = ThreeWayClassifier::classify(&ledger, &local, &remote);
        debug!(recipe, phase = %SyncPhase::Classified, revision = revision.as_str(), "snapshot");
        Ok(Snapshot {
            ledger,
            remote,
            revision,
            classification,
        })
    }

    /// Set the ledger entry for `path` and keep its bytes as the next base.
    fn record(
        &self,
        ledger: &mut ContentHashLedger,
        store: &SnapshotStore,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), SyncError> {
        let hash = if self.keep_base_snapshots {
            store.put(bytes)?
        } else {
            FileHash::of(bytes)
        };
        ledger.set(path, hash);
        Ok(())
    }

    fn finish(&self, recipe: &str, wc: &WorkingCopy, ledger: &ContentHashLedger) -> Result<(), SyncError> {
        ledger.save(wc.meta_dir())?;
        wc.save_meta(&RecipeMeta {
            recipe: recipe.to_string(),
            last_synced_at: Some(Utc::now()),
        })?;

        let keep: BTreeSet<&FileHash> = if self.keep_base_snapshots {
            ledger.entries().values().collect()
        } else {
            BTreeSet::new()
        };
        wc.snapshots().prune(&keep)?;
        Ok(())
    }
}

/// Refuse a working copy that mirrors a different recipe.
fn check_recipe(wc: &WorkingCopy, recipe: &str) -> Result<(), SyncError> {
    if let Some(meta) = wc.load_meta()? {
        if meta.recipe != recipe {
            return Err(SyncError::InvalidOptions(format!(
                "'{}' is a working copy of recipe '{}', not '{}'",
                wc.root().display(),
                meta.recipe,
                recipe
            )));
        }
    }
    Ok(())
}

/// Remove a local-only directory left empty, e.g. after its files were
/// deleted on both sides.
fn remove_if_empty(wc: &WorkingCopy, dir: &str) -> std::io::Result<()> {
    if std::fs::read_dir(wc.abs(dir))?.next().is_some() {
        return Ok(());
    }
    wc.delete_dir(dir)?;
    debug!(path = dir, "removed empty local directory");
    Ok(())
}

fn interrupted(report: &PullReport, path: &str, source: SyncError) -> SyncError {
    let partial = if report.is_empty() {
        String::new()
    } else {
        report.to_string()
    };
    SyncError::Interrupted {
        report: partial,
        path: path.to_string(),
        source: Box::new(CoreError::Sync(source)),
    }
}

// ---------------------------------------------------------------------------
// Sync lock RAII guard
// ---------------------------------------------------------------------------

/// Drop guard that resets the `running` flag, even if the operation panics.
struct SyncLockGuard<'a>(&'a AtomicBool);

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
