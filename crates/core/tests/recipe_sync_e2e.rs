//! End-to-end tests for recipe pull / push / status.
//!
//! These tests exercise the real `SyncEngine` with:
//! - A directory-backed remote under a temp dir (real files, real revisions)
//! - An in-memory remote where a test needs to inject failures
//! - Real working copies with `.dk` metadata on disk
//!
//! No network I/O.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use recipesync_core::config::AppConfig;
use recipesync_core::errors::{RemoteError, SyncError};
use recipesync_core::ledger::ContentHashLedger;
use recipesync_core::models::FileHash;
use recipesync_core::plan::{FileChange, PullEvent, PullOptions, PushOptions};
use recipesync_core::remote::{DirectoryRemote, MemoryRemote, RecipeRemote, RemoteOp};
use recipesync_core::scanner::{IgnoreRules, TreeScanner};
use recipesync_core::sync_engine::SyncEngine;

const RECIPE: &str = "simple";

// ===========================================================================
// Helpers
// ===========================================================================

struct Fixture {
    _tmp: TempDir,
    remote_root: PathBuf,
    wc: PathBuf,
    engine: SyncEngine<DirectoryRemote>,
}

impl Fixture {
    fn remote(&self) -> &DirectoryRemote {
        self.engine.remote()
    }

    fn pull(&self, options: PullOptions) -> String {
        self.engine
            .pull(RECIPE, &self.wc, &options)
            .expect("pull failed")
            .to_string()
    }

    fn status(&self) -> String {
        self.engine
            .status(RECIPE, &self.wc)
            .expect("status failed")
            .to_string()
    }

    fn ledger(&self) -> ContentHashLedger {
        ContentHashLedger::load(&self.wc.join(".dk")).unwrap()
    }

    fn local(&self, path: &str) -> PathBuf {
        self.wc.join(path)
    }
}

/// A directory remote holding one recipe, and an engine bound to it.
fn fixture(files: &[(&str, &str)]) -> Fixture {
    fixture_with(files, AppConfig::default())
}

fn fixture_with(files: &[(&str, &str)], config: AppConfig) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let remote_root = tmp.path().join("remote");
    let recipe_dir = remote_root.join(RECIPE);
    fs::create_dir_all(&recipe_dir).unwrap();
    write(&recipe_dir, files);

    let scanner = TreeScanner::new(
        config.sync.metadata_dir.clone(),
        IgnoreRules::new(config.sync.ignore_patterns.clone()),
    );
    let remote = DirectoryRemote::new(&remote_root, scanner);
    let wc = tmp.path().join("work").join(RECIPE);

    Fixture {
        _tmp: tmp,
        remote_root,
        wc,
        engine: SyncEngine::new(remote, &config.sync),
    }
}

fn write(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn basic_recipe() -> Fixture {
    fixture(&[
        ("description.json", "{\"recipe\": \"simple\"}\n"),
        ("simple-file.txt", "line1\nline2\n"),
        ("node1/description.json", "{\"node\": 1}\n"),
        ("node1/data_sources/DKDataSource_NoOp.json", "[]\n"),
    ])
}

fn push_options(delete_remote: bool) -> PushOptions {
    PushOptions {
        message: "update all".into(),
        delete_remote,
    }
}

fn overwrite_all() -> PullOptions {
    PullOptions {
        overwrite: true,
        delete_local: true,
        yes: true,
    }
}

fn memory_engine(files: &[(&str, &str)]) -> (TempDir, PathBuf, SyncEngine<MemoryRemote>) {
    let remote = MemoryRemote::new();
    remote.insert_recipe(RECIPE, files.iter().map(|(p, c)| (*p, c.as_bytes())));
    let tmp = TempDir::new().unwrap();
    let wc = tmp.path().join(RECIPE);
    let engine = SyncEngine::new(remote, &AppConfig::default().sync);
    (tmp, wc, engine)
}

// ===========================================================================
// Checkout and idempotence
// ===========================================================================

#[test]
fn test_fresh_checkout_reports_every_file() {
    let fx = basic_recipe();
    let report = fx.pull(PullOptions::default());
    assert_eq!(
        report,
        "4 new or missing files from remote:\n\
         \tdescription.json\n\
         \tnode1/data_sources/DKDataSource_NoOp.json\n\
         \tnode1/description.json\n\
         \tsimple-file.txt\n"
    );

    assert_eq!(read(&fx.local("simple-file.txt")), "line1\nline2\n");
    let ledger = fx.ledger();
    assert_eq!(ledger.len(), 4);
    assert_eq!(
        ledger.get("simple-file.txt"),
        Some(&FileHash::of(b"line1\nline2\n"))
    );
    assert_eq!(
        ledger.orig_head(),
        Some(fx.remote().revision(RECIPE).unwrap().as_str())
    );
    assert_eq!(fx.status(), "4 files are unchanged\n");
}

#[test]
fn test_second_pull_is_a_no_op() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    let ledger_before = fs::read_to_string(fx.wc.join(".dk/FILE_SHA")).unwrap();

    assert_eq!(fx.pull(PullOptions::default()).trim(), "Nothing to do");
    assert_eq!(fx.status(), "4 files are unchanged\n");
    assert_eq!(
        fs::read_to_string(fx.wc.join(".dk/FILE_SHA")).unwrap(),
        ledger_before
    );
}

#[test]
fn test_remote_missing_recipe() {
    let fx = basic_recipe();
    let err = fx
        .engine
        .pull("nope", &fx.wc, &PullOptions::default())
        .unwrap_err();
    assert_eq!(err.to_string(), "sync remote error: Unable to find recipe nope");
    assert!(!fx.wc.join(".dk").exists());
}

#[test]
fn test_empty_remote_directories_are_checked_out() {
    let fx = basic_recipe();
    fs::create_dir_all(fx.remote_root.join(RECIPE).join("node1/my-empty-folder")).unwrap();
    fx.pull(PullOptions::default());
    assert!(fx.local("node1/my-empty-folder").is_dir());
    assert_eq!(fx.status(), "4 files are unchanged\n");
}

#[test]
fn test_ignored_local_files_stay_out_of_status() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.local(".DS_Store"), "junk").unwrap();
    fs::create_dir_all(fx.local("node1/__pycache__")).unwrap();
    fs::write(fx.local("node1/__pycache__/x.pyc"), "junk").unwrap();
    assert_eq!(fx.status(), "4 files are unchanged\n");
}

// ===========================================================================
// Pull
// ===========================================================================

#[test]
fn test_locally_deleted_file_is_restored() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::remove_file(fx.local("description.json")).unwrap();

    assert_eq!(
        fx.status(),
        "1 files are remote only:\n\
         \tdescription.json\n\
         \n\
         3 files are unchanged\n"
    );
    assert_eq!(
        fx.pull(PullOptions::default()),
        "1 new or missing files from remote:\n\tdescription.json\n"
    );
    assert_eq!(
        read(&fx.local("description.json")),
        "{\"recipe\": \"simple\"}\n"
    );
    assert_eq!(fx.status(), "4 files are unchanged\n");
}

#[test]
fn test_remote_edit_is_fetched() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fx.remote()
        .push(RECIPE, "simple-file.txt", b"line1\nline2\nremote\n", "edit")
        .unwrap();

    assert_eq!(
        fx.status(),
        "1 files are modified on remote:\n\
         \tsimple-file.txt\n\
         \n\
         3 files are unchanged\n"
    );
    assert_eq!(
        fx.pull(PullOptions::default()),
        "Getting from remote 'simple-file.txt'\n"
    );
    assert_eq!(read(&fx.local("simple-file.txt")), "line1\nline2\nremote\n");
}

#[test]
fn test_disjoint_edits_auto_merge_cleanly() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());

    fs::write(fx.local("simple-file.txt"), "line1\nline2\nline3\n").unwrap();
    fx.remote()
        .push(RECIPE, "simple-file.txt", b"line0\nline1\nline2\n", "prepend")
        .unwrap();

    assert_eq!(
        fx.pull(PullOptions::default()),
        "Auto-merging 'simple-file.txt'\n"
    );
    assert_eq!(
        read(&fx.local("simple-file.txt")),
        "line0\nline1\nline2\nline3\n"
    );

    // The merged result is a local change until pushed.
    assert_eq!(
        fx.status(),
        "1 files are modified on local:\n\
         \tsimple-file.txt\n\
         \n\
         3 files are unchanged\n"
    );
    let report = fx
        .engine
        .push(RECIPE, &fx.wc, &PushOptions {
            message: "merged".into(),
            delete_remote: false,
        })
        .unwrap();
    assert_eq!(report.updated_files, vec!["simple-file.txt"]);
    assert_eq!(
        fx.remote().fetch(RECIPE, "simple-file.txt").unwrap(),
        b"line0\nline1\nline2\nline3\n"
    );
    assert_eq!(fx.status(), "4 files are unchanged\n");
}

/// Remote adds one file, edits another, deletes a third; the edited file
/// was also changed locally.
fn diverged_recipe() -> Fixture {
    let fx = fixture(&[
        ("description.json", "{}\n"),
        ("remote_and_local_modify.txt", "line1\nline2\n"),
        ("remote_delete_file.txt", "doomed\n"),
    ]);
    fx.pull(PullOptions::default());

    let remote = fx.remote();
    remote
        .push(RECIPE, "remote-new-file.txt", b"new\n", "add")
        .unwrap();
    remote
        .push(
            RECIPE,
            "remote_and_local_modify.txt",
            b"line1\nline2\nremote line\n",
            "edit",
        )
        .unwrap();
    remote
        .delete(RECIPE, "remote_delete_file.txt", "remove")
        .unwrap();
    fs::write(
        fx.local("remote_and_local_modify.txt"),
        "line1\nline2\nlocal line\n",
    )
    .unwrap();
    fx
}

#[test]
fn test_conflicting_edits_are_marked_not_fatal() {
    let fx = diverged_recipe();
    assert_eq!(
        fx.status(),
        "1 files are modified on both local and remote:\n\
         \tremote_and_local_modify.txt\n\
         \n\
         1 files are local only:\n\
         \tremote_delete_file.txt\n\
         \n\
         1 files are remote only:\n\
         \tremote-new-file.txt\n\
         \n\
         1 files are unchanged\n"
    );

    assert_eq!(
        fx.pull(PullOptions::default()),
        "1 new or missing files from remote:\n\
         \tremote-new-file.txt\n\
         Auto-merging 'remote_and_local_modify.txt'\n\
         CONFLICT (content): Merge conflict in remote_and_local_modify.txt\n"
    );

    assert!(fx.local("remote-new-file.txt").is_file());
    assert!(fx.local("remote_delete_file.txt").is_file());
    assert_eq!(
        read(&fx.local("remote_and_local_modify.txt")),
        "line1\nline2\n\
         <<<<<<< LOCAL\n\
         local line\n\
         =======\n\
         remote line\n\
         >>>>>>> REMOTE\n"
    );
}

#[test]
fn test_overwrite_with_delete_local_matches_remote() {
    let fx = diverged_recipe();
    let report = fx.pull(PullOptions {
        overwrite: true,
        delete_local: true,
        yes: true,
    });
    assert_eq!(
        report,
        "deleting local file: remote_delete_file.txt\n\
         \n\
         1 new or missing files from remote:\n\
         \tremote-new-file.txt\n\
         Getting from remote 'remote_and_local_modify.txt'\n"
    );

    assert!(fx.local("remote-new-file.txt").is_file());
    assert!(!fx.local("remote_delete_file.txt").exists());
    assert_eq!(
        read(&fx.local("remote_and_local_modify.txt")),
        "line1\nline2\nremote line\n"
    );
    assert!(!fx.ledger().contains("remote_delete_file.txt"));
    assert_eq!(fx.status(), "3 files are unchanged\n");
}

#[test]
fn test_overwrite_deletes_untracked_and_reverts_modified() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.local("new.txt"), "untracked\n").unwrap();
    fs::write(fx.local("simple-file.txt"), "local edit\n").unwrap();

    let report = fx.pull(PullOptions {
        overwrite: true,
        delete_local: true,
        yes: true,
    });
    assert_eq!(
        report,
        "deleting local file: new.txt\n\
         \n\
         Getting from remote 'simple-file.txt'\n"
    );
    assert!(!fx.local("new.txt").exists());
    assert_eq!(read(&fx.local("simple-file.txt")), "line1\nline2\n");
    assert_eq!(fx.status(), "4 files are unchanged\n");
}

#[test]
fn test_plain_pull_keeps_local_edits_and_new_files() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.local("new.txt"), "untracked\n").unwrap();
    fs::write(fx.local("simple-file.txt"), "local edit\n").unwrap();

    assert_eq!(fx.pull(PullOptions::default()).trim(), "Nothing to do");
    assert!(fx.local("new.txt").exists());
    assert_eq!(read(&fx.local("simple-file.txt")), "local edit\n");
    assert!(!fx.ledger().contains("new.txt"));
}

#[test]
fn test_local_only_directories_deleted_deepest_first() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    write(&fx.wc, &[("my-root-folder/sub/my-root-1.txt", "x\n")]);
    fs::create_dir_all(fx.local("my-empty-folder-1")).unwrap();

    assert_eq!(
        fx.status(),
        "1 files are local only:\n\
         \tmy-root-folder/sub/my-root-1.txt\n\
         \n\
         3 directories are local only:\n\
         \tmy-empty-folder-1\n\
         \tmy-root-folder\n\
         \tmy-root-folder/sub\n\
         \n\
         4 files are unchanged\n"
    );

    let report = fx.pull(PullOptions {
        overwrite: true,
        delete_local: true,
        yes: true,
    });
    assert_eq!(
        report,
        "deleting local file: my-root-folder/sub/my-root-1.txt\n\
         deleting local directory: my-root-folder/sub\n\
         deleting local directory: my-empty-folder-1\n\
         deleting local directory: my-root-folder\n\
         \n"
    );
    assert!(!fx.local("my-root-folder").exists());
    assert!(!fx.local("my-empty-folder-1").exists());
}

#[test]
fn test_delete_local_requires_overwrite() {
    let fx = basic_recipe();
    let err = fx
        .engine
        .pull(RECIPE, &fx.wc, &PullOptions {
            overwrite: false,
            delete_local: true,
            yes: true,
        })
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidOptions(_)));
    assert!(!fx.wc.exists());
}

#[test]
fn test_preview_is_rejected_after_remote_moves() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fx.remote()
        .push(RECIPE, "simple-file.txt", b"v2\n", "edit")
        .unwrap();

    let preview = fx
        .engine
        .preview_pull(RECIPE, &fx.wc, &PullOptions::default())
        .unwrap();
    let described = preview.describe();
    assert_eq!(described.len(), 1);
    assert_eq!(described[0].action, "restore_from_remote");
    // Previewing changes nothing.
    assert_eq!(read(&fx.local("simple-file.txt")), "line1\nline2\n");

    fx.remote()
        .push(RECIPE, "simple-file.txt", b"v3\n", "edit again")
        .unwrap();
    let err = fx.engine.apply_preview(&preview).unwrap_err();
    assert!(matches!(err, SyncError::RemoteMoved { .. }));

    let preview = fx
        .engine
        .preview_pull(RECIPE, &fx.wc, &PullOptions::default())
        .unwrap();
    let report = fx.engine.apply_preview(&preview).unwrap();
    assert_eq!(report.to_string(), "Getting from remote 'simple-file.txt'\n");
    assert_eq!(read(&fx.local("simple-file.txt")), "v3\n");
}

#[test]
fn test_untracked_copy_matching_remote_is_adopted() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fx.remote()
        .push(RECIPE, "shared.txt", b"same\n", "add")
        .unwrap();
    fs::write(fx.local("shared.txt"), "same\n").unwrap();

    assert_eq!(
        fx.status(),
        "1 files are local only:\n\
         \tshared.txt\n\
         \n\
         4 files are unchanged\n"
    );
    assert_eq!(fx.pull(PullOptions::default()).trim(), "Nothing to do");
    assert_eq!(fx.ledger().get("shared.txt"), Some(&FileHash::of(b"same\n")));
    assert_eq!(fx.status(), "5 files are unchanged\n");
}

#[test]
fn test_file_replaced_by_directory_is_refused() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::remove_file(fx.local("simple-file.txt")).unwrap();
    fs::create_dir(fx.local("simple-file.txt")).unwrap();

    match fx.engine.status(RECIPE, &fx.wc).unwrap_err() {
        SyncError::PathKindMismatch(path) => assert_eq!(path, "simple-file.txt"),
        other => panic!("unexpected error: {other}"),
    }
    let err = fx
        .engine
        .pull(RECIPE, &fx.wc, &overwrite_all())
        .unwrap_err();
    assert!(matches!(err, SyncError::PathKindMismatch(_)));
    assert!(fx.local("simple-file.txt").is_dir());
}

#[test]
fn test_local_only_directory_holding_ignored_files_is_kept() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    write(&fx.wc, &[("scratch/.DS_Store", "junk")]);
    fs::create_dir(fx.local("empty-one")).unwrap();

    assert_eq!(
        fx.status(),
        "2 directories are local only:\n\
         \tempty-one\n\
         \tscratch\n\
         \n\
         4 files are unchanged\n"
    );
    assert_eq!(
        fx.pull(overwrite_all()),
        "deleting local directory: empty-one\n\n"
    );
    assert!(!fx.local("empty-one").exists());
    assert!(fx.local("scratch/.DS_Store").is_file());
    assert_eq!(
        fx.status(),
        "1 directories are local only:\n\
         \tscratch\n\
         \n\
         4 files are unchanged\n"
    );
}

#[test]
fn test_merge_without_base_snapshots_uses_empty_base() {
    let mut config = AppConfig::default();
    config.sync.keep_base_snapshots = false;
    let fx = fixture_with(&[("simple-file.txt", "line1\nline2\n")], config);
    fx.pull(PullOptions::default());
    assert!(!fx.wc.join(".dk/objects").exists());
    assert_eq!(
        fx.ledger().get("simple-file.txt"),
        Some(&FileHash::of(b"line1\nline2\n"))
    );

    fs::write(fx.local("simple-file.txt"), "line1\nline2\nlocal\n").unwrap();
    fx.remote()
        .push(RECIPE, "simple-file.txt", b"line1\nline2\nremote\n", "edit")
        .unwrap();

    assert_eq!(
        fx.pull(PullOptions::default()),
        "Auto-merging 'simple-file.txt'\n\
         CONFLICT (content): Merge conflict in simple-file.txt\n"
    );
    // With no base every line differs, so the whole file is one conflict.
    assert_eq!(
        read(&fx.local("simple-file.txt")),
        "<<<<<<< LOCAL\n\
         line1\nline2\nlocal\n\
         =======\n\
         line1\nline2\nremote\n\
         >>>>>>> REMOTE\n"
    );
    assert!(!fx.wc.join(".dk/objects").exists());
}

#[test]
fn test_preview_is_rejected_after_local_edit() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.local("simple-file.txt"), "line1\nline2\nline3\n").unwrap();
    fx.remote()
        .push(RECIPE, "simple-file.txt", b"line0\nline1\nline2\n", "prepend")
        .unwrap();

    let preview = fx
        .engine
        .preview_pull(RECIPE, &fx.wc, &PullOptions::default())
        .unwrap();
    assert_eq!(preview.describe()[0].action, "auto_merge");

    fs::write(fx.local("simple-file.txt"), "line1\nline2\nline3\nline4\n").unwrap();
    let err = fx.engine.apply_preview(&preview).unwrap_err();
    assert!(err.is_stale());
    match err {
        SyncError::LocalChanged(path) => assert_eq!(path, "simple-file.txt"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        read(&fx.local("simple-file.txt")),
        "line1\nline2\nline3\nline4\n"
    );

    let preview = fx
        .engine
        .preview_pull(RECIPE, &fx.wc, &PullOptions::default())
        .unwrap();
    let report = fx.engine.apply_preview(&preview).unwrap();
    assert_eq!(report.events, vec![PullEvent::Merged("simple-file.txt".into())]);
    assert_eq!(
        read(&fx.local("simple-file.txt")),
        "line0\nline1\nline2\nline3\nline4\n"
    );
}

// ===========================================================================
// Push
// ===========================================================================

#[test]
fn test_push_new_updated_and_deleted() {
    let fx = fixture(&[
        ("description.json", "{}\n"),
        ("local_modify_file.txt", "before\n"),
        ("simple-file.txt", "line1\nline2\n"),
    ]);
    fx.pull(PullOptions::default());

    fs::write(fx.local("local_new_file.txt"), "brand new\n").unwrap();
    fs::write(fx.local("local_modify_file.txt"), "after\n").unwrap();
    fs::remove_file(fx.local("simple-file.txt")).unwrap();

    let report = fx
        .engine
        .push(RECIPE, &fx.wc, &PushOptions {
            message: "update all".into(),
            delete_remote: true,
        })
        .unwrap();
    assert_eq!(
        report.to_string(),
        "Update results:\n\
         \n\
         New files:\n\
         \tlocal_new_file.txt\n\
         Updated files:\n\
         \tlocal_modify_file.txt\n\
         Deleted files:\n\
         \tsimple-file.txt\n\
         \n\
         Issues:\n\
         \n\
         No issues found"
    );

    let ledger = fx.ledger();
    assert!(ledger.contains("local_new_file.txt"));
    assert!(!ledger.contains("simple-file.txt"));
    assert_eq!(
        ledger.get("local_modify_file.txt"),
        Some(&FileHash::of(b"after\n"))
    );
    assert!(matches!(
        fx.remote().fetch(RECIPE, "simple-file.txt"),
        Err(recipesync_core::errors::RemoteError::FileNotFound { .. })
    ));
    assert_eq!(
        ledger.orig_head(),
        Some(fx.remote().revision(RECIPE).unwrap().as_str())
    );
    assert_eq!(fx.status(), "3 files are unchanged\n");
}

#[test]
fn test_local_delete_without_delete_remote_keeps_ledger() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::remove_file(fx.local("simple-file.txt")).unwrap();

    let report = fx
        .engine
        .push(RECIPE, &fx.wc, &PushOptions {
            message: "update all".into(),
            delete_remote: false,
        })
        .unwrap();
    assert_eq!(
        report.to_string(),
        "Update results:\n\
         \n\
         New files:\n\
         \tNone\n\
         Updated files:\n\
         \tNone\n\
         Deleted files:\n\
         \tNone\n\
         \n\
         Issues:\n\
         \n\
         No issues found"
    );
    assert!(!fx.local("simple-file.txt").exists());
    assert!(fx.ledger().contains("simple-file.txt"));
    assert!(fx.remote().fetch(RECIPE, "simple-file.txt").is_ok());

    fx.pull(PullOptions::default());
    assert_eq!(read(&fx.local("simple-file.txt")), "line1\nline2\n");
}

#[test]
fn test_push_refused_when_remote_changed() {
    let (_tmp, wc, engine) = memory_engine(&[
        ("description.json", "{}\n"),
        ("remote_and_local_modify.txt", "line1\n"),
    ]);
    engine.pull(RECIPE, &wc, &PullOptions::default()).unwrap();

    fs::write(wc.join("remote_and_local_modify.txt"), "local\n").unwrap();
    fs::write(wc.join("other_new.txt"), "new\n").unwrap();
    engine
        .remote()
        .put_file(RECIPE, "remote_and_local_modify.txt", b"remote\n");

    let err = engine
        .push(RECIPE, &wc, &PushOptions {
            message: "update all".into(),
            delete_remote: true,
        })
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "ERROR: 1 files have remote changes. Please run 'get' first.\n\tremote_and_local_modify.txt"
    );
    assert!(engine.remote().mutations().is_empty());
}

#[test]
fn test_push_failure_is_an_issue_not_an_abort() {
    let (_tmp, wc, engine) = memory_engine(&[("description.json", "{}\n")]);
    engine.pull(RECIPE, &wc, &PullOptions::default()).unwrap();

    fs::write(wc.join("a.txt"), "a\n").unwrap();
    fs::write(wc.join("b.txt"), "b\n").unwrap();
    fs::write(wc.join("c.txt"), "c\n").unwrap();
    engine.remote().fail_on(RemoteOp::Push, "b.txt");

    let report = engine
        .push(RECIPE, &wc, &PushOptions {
            message: "update all".into(),
            delete_remote: false,
        })
        .unwrap();
    assert_eq!(report.new_files, vec!["a.txt", "c.txt"]);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].path, "b.txt");
    assert!(report.to_string().contains("Issues:\n\n\tb.txt: "));

    let ledger = ContentHashLedger::load(&wc.join(".dk")).unwrap();
    assert!(ledger.contains("a.txt"));
    assert!(!ledger.contains("b.txt"));

    // The failed file is still local-only and goes through on retry.
    engine.remote().clear_failures();
    let report = engine
        .push(RECIPE, &wc, &PushOptions {
            message: "retry".into(),
            delete_remote: false,
        })
        .unwrap();
    assert_eq!(report.new_files, vec!["b.txt"]);
    assert!(!report.has_issues());
}

#[test]
fn test_push_removes_empty_local_directories() {
    let fx = fixture(&[("simple-file.txt", "line1\nline2\n")]);
    fx.pull(PullOptions::default());
    fs::create_dir(fx.wc.join("emptysubdir")).unwrap();
    fs::create_dir_all(fx.local("outer/inner")).unwrap();
    write(&fx.wc, &[("fresh/new.txt", "new\n")]);

    let report = fx.engine.push(RECIPE, &fx.wc, &push_options(true)).unwrap();
    assert_eq!(report.new_files, vec!["fresh/new.txt"]);
    assert!(!report.has_issues());

    assert!(!fx.wc.join("emptysubdir").exists());
    assert!(!fx.local("outer").exists());
    assert!(fx.local("fresh/new.txt").is_file());
    assert_eq!(fx.status(), "2 files are unchanged\n");
}

// ===========================================================================
// Single files
// ===========================================================================

#[test]
fn test_get_file_replaces_local_edit() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.local("simple-file.txt"), "local edit\n").unwrap();
    fx.remote()
        .push(RECIPE, "simple-file.txt", b"line1\nline2\nremote\n", "edit")
        .unwrap();

    let change = fx
        .engine
        .get_file(RECIPE, &fx.wc, "simple-file.txt")
        .unwrap();
    assert_eq!(change, FileChange::Fetched("simple-file.txt".into()));
    assert_eq!(read(&fx.local("simple-file.txt")), "line1\nline2\nremote\n");

    let hash = FileHash::of(b"line1\nline2\nremote\n");
    assert_eq!(fx.ledger().get("simple-file.txt"), Some(&hash));
    let object = fx
        .wc
        .join(".dk/objects")
        .join(&hash.as_str()[..2])
        .join(&hash.as_str()[2..]);
    assert!(object.is_file());
    assert_eq!(fx.status(), "4 files are unchanged\n");

    let err = fx
        .engine
        .get_file(RECIPE, &fx.wc, "missing.txt")
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Remote(RemoteError::FileNotFound { .. })
    ));
}

#[test]
fn test_update_file_pushes_only_that_file() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.local("simple-file.txt"), "line1\nline2\nline3\n").unwrap();
    fs::write(fx.local("node1/description.json"), "{\"node\": 2}\n").unwrap();

    let change = fx
        .engine
        .update_file(RECIPE, &fx.wc, "simple-file.txt", "edit one")
        .unwrap();
    assert_eq!(change, FileChange::Updated("simple-file.txt".into()));
    assert_eq!(
        fx.remote().fetch(RECIPE, "simple-file.txt").unwrap(),
        b"line1\nline2\nline3\n"
    );
    assert_eq!(
        fx.ledger().get("simple-file.txt"),
        Some(&FileHash::of(b"line1\nline2\nline3\n"))
    );
    assert_eq!(
        fx.status(),
        "1 files are modified on local:\n\
         \tnode1/description.json\n\
         \n\
         3 files are unchanged\n"
    );
    assert!(!fx.engine.status(RECIPE, &fx.wc).unwrap().remote_moved());

    let again = fx
        .engine
        .update_file(RECIPE, &fx.wc, "simple-file.txt", "edit one")
        .unwrap();
    assert_eq!(again, FileChange::Unchanged("simple-file.txt".into()));
}

#[test]
fn test_update_file_adds_new_file() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    write(&fx.wc, &[("resources/added.sql", "select 1;\n")]);

    let change = fx
        .engine
        .update_file(RECIPE, &fx.wc, "resources/added.sql", "add")
        .unwrap();
    assert_eq!(change, FileChange::Added("resources/added.sql".into()));
    assert_eq!(
        fx.remote().fetch(RECIPE, "resources/added.sql").unwrap(),
        b"select 1;\n"
    );
    assert_eq!(fx.status(), "5 files are unchanged\n");

    match fx
        .engine
        .update_file(RECIPE, &fx.wc, "badfile.txt", "add")
        .unwrap_err()
    {
        SyncError::MissingLocalFile(path) => assert_eq!(path, "badfile.txt"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        fx.remote().fetch(RECIPE, "badfile.txt"),
        Err(RemoteError::FileNotFound { .. })
    ));
}

#[test]
fn test_update_file_refused_when_remote_changed() {
    let (_tmp, wc, engine) = memory_engine(&[
        ("description.json", "{}\n"),
        ("simple-file.txt", "line1\n"),
    ]);
    engine.pull(RECIPE, &wc, &PullOptions::default()).unwrap();
    fs::write(wc.join("simple-file.txt"), "local\n").unwrap();
    engine
        .remote()
        .put_file(RECIPE, "simple-file.txt", b"remote\n");

    let err = engine
        .update_file(RECIPE, &wc, "simple-file.txt", "edit")
        .unwrap_err();
    assert!(err.is_stale());
    assert_eq!(
        err.to_string(),
        "ERROR: 1 files have remote changes. Please run 'get' first.\n\tsimple-file.txt"
    );
    assert!(engine.remote().mutations().is_empty());
    assert_eq!(fs::read_to_string(wc.join("simple-file.txt")).unwrap(), "local\n");
}

#[test]
fn test_delete_file_removes_remote_copy_and_ledger_entry() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());

    // Already gone locally.
    fs::remove_file(fx.local("simple-file.txt")).unwrap();
    let change = fx
        .engine
        .delete_file(RECIPE, &fx.wc, "simple-file.txt", "remove")
        .unwrap();
    assert_eq!(change, FileChange::Deleted("simple-file.txt".into()));

    // Still present locally.
    fx.engine
        .delete_file(RECIPE, &fx.wc, "node1/description.json", "remove")
        .unwrap();
    assert!(!fx.local("node1/description.json").exists());

    for path in ["simple-file.txt", "node1/description.json"] {
        assert!(matches!(
            fx.remote().fetch(RECIPE, path),
            Err(RemoteError::FileNotFound { .. })
        ));
        assert!(!fx.ledger().contains(path));
    }
    assert_eq!(fx.status(), "2 files are unchanged\n");
    assert!(!fx.engine.status(RECIPE, &fx.wc).unwrap().remote_moved());

    let err = fx
        .engine
        .delete_file(RECIPE, &fx.wc, "simple-file.txt", "remove")
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Remote(RemoteError::FileNotFound { .. })
    ));
}

// ===========================================================================
// Failures, diff
// ===========================================================================

#[test]
fn test_pull_fetch_failure_interrupts() {
    let (_tmp, wc, engine) = memory_engine(&[("a.txt", "a\n"), ("b.txt", "b\n")]);
    engine.remote().fail_on(RemoteOp::Fetch, "b.txt");

    let err = engine
        .pull(RECIPE, &wc, &PullOptions::default())
        .unwrap_err();
    match err {
        SyncError::Interrupted { path, .. } => assert_eq!(path, "b.txt"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!wc.join("b.txt").exists());

    engine.remote().clear_failures();
    let report = engine.pull(RECIPE, &wc, &PullOptions::default()).unwrap();
    assert_eq!(report.events.len(), 2);
}

#[cfg(unix)]
#[test]
fn test_local_write_failure_keeps_partial_ledger() {
    let (tmp, wc, engine) = memory_engine(&[("a.txt", "a\n")]);
    engine.pull(RECIPE, &wc, &PullOptions::default()).unwrap();
    let head = ContentHashLedger::load(&wc.join(".dk"))
        .unwrap()
        .orig_head()
        .map(str::to_string);

    engine.remote().put_file(RECIPE, "b.txt", b"b\n");
    engine.remote().put_file(RECIPE, "c.txt", b"c\n");
    // The scan skips a dangling symlink, but writing through it fails.
    std::os::unix::fs::symlink(tmp.path().join("nowhere/c.txt"), wc.join("c.txt")).unwrap();

    let err = engine
        .pull(RECIPE, &wc, &PullOptions::default())
        .unwrap_err();
    match err {
        SyncError::Interrupted { report, path, .. } => {
            assert_eq!(path, "c.txt");
            assert_eq!(report, "1 new or missing files from remote:\n\tb.txt\n");
        }
        other => panic!("unexpected error: {other}"),
    }

    let ledger = ContentHashLedger::load(&wc.join(".dk")).unwrap();
    assert!(ledger.contains("a.txt"));
    assert_eq!(ledger.get("b.txt"), Some(&FileHash::of(b"b\n")));
    assert!(!ledger.contains("c.txt"));
    assert_eq!(ledger.orig_head().map(str::to_string), head);
}

#[test]
fn test_corrupt_ledger_is_fatal() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.wc.join(".dk/FILE_SHA"), "simple-file.txt:not-a-hash\n").unwrap();

    let err = fx.engine.status(RECIPE, &fx.wc).unwrap_err();
    assert!(matches!(err, SyncError::Ledger(_)));
    let err = fx
        .engine
        .pull(RECIPE, &fx.wc, &PullOptions::default())
        .unwrap_err();
    assert!(matches!(err, SyncError::Ledger(_)));
}

#[test]
fn test_diff_shows_remote_to_local_changes() {
    let fx = basic_recipe();
    fx.pull(PullOptions::default());
    fs::write(fx.local("simple-file.txt"), "line1\nchanged\n").unwrap();
    fs::write(fx.local("node1/description.json"), "{\"node\": 2}\n").unwrap();

    let diffs = fx.engine.diff(RECIPE, &fx.wc, &[]).unwrap();
    assert_eq!(diffs.len(), 2);

    let only = fx
        .engine
        .diff(RECIPE, &fx.wc, &["simple-file.txt".to_string()])
        .unwrap();
    assert_eq!(only.len(), 1);
    assert!(only[0].patch.contains("-line2\n"));
    assert!(only[0].patch.contains("+changed\n"));

    let under_node = fx.engine.diff(RECIPE, &fx.wc, &["node1".to_string()]).unwrap();
    assert_eq!(under_node.len(), 1);
    assert_eq!(under_node[0].path, "node1/description.json");
}
