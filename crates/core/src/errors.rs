//! Error types for the recipesync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Ledger errors
// ---------------------------------------------------------------------------

/// Errors from the persisted content-hash ledger and snapshot store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The `FILE_SHA` file exists but cannot be parsed into `path:hash` pairs.
    #[error("corrupt ledger at '{path}' line {line}: {detail}")]
    CorruptLedger {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// The `RECIPE_META` file exists but is not valid TOML.
    #[error("corrupt recipe metadata at '{path}': {detail}")]
    CorruptMeta { path: PathBuf, detail: String },

    /// Generic I/O wrapper.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Scan errors
// ---------------------------------------------------------------------------

/// Errors from walking a local working tree.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A path under the root could not be read. The whole scan is aborted.
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path could not be expressed as a normalized relative path.
    #[error("invalid path '{0}'")]
    InvalidPath(String),
}

// ---------------------------------------------------------------------------
// Remote errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`crate::remote::RecipeRemote`] implementation.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote has no recipe with this name.
    #[error("Unable to find recipe {0}")]
    RecipeNotFound(String),

    /// The remote recipe has no file at this path.
    #[error("remote file not found: {recipe}/{path}")]
    FileNotFound { recipe: String, path: String },

    /// The remote call failed after the collaborator's own retry policy.
    #[error("remote {op} failed for '{path}': {detail}")]
    CallFailed {
        op: String,
        path: String,
        detail: String,
    },

    /// Generic I/O wrapper (directory-backed remote).
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the pull / push / status operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The target directory is non-empty and has no metadata directory.
    #[error("'{0}' exists but is not a recipe working copy")]
    NotARecipeWorkingCopy(PathBuf),

    /// The remote has changes this working copy has not seen.
    #[error("ERROR: {} files have remote changes. Please run 'get' first.{}", paths.len(), tab_list(paths))]
    StaleMergePreview { paths: Vec<String> },

    /// The remote revision moved between a preview and its application.
    #[error("remote recipe moved from revision {expected} to {actual} since the preview was taken")]
    RemoteMoved { expected: String, actual: String },

    /// Another operation holds this engine.
    #[error("a sync operation is already running (started at {started_at})")]
    AlreadyRunning { started_at: String },

    /// Contradictory operation flags.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// A path is a file on one side and a directory on the other.
    #[error("'{0}' is a file on one side and a directory on the other")]
    PathKindMismatch(String),

    /// A file a preview merged was edited locally before the preview was applied.
    #[error("'{0}' changed locally since the preview was taken")]
    LocalChanged(String),

    /// A single-file operation named a file the working copy does not have.
    #[error("'{0}' does not exist in the working copy")]
    MissingLocalFile(String),

    /// An action failed mid-pull; `report` holds what was applied before it.
    #[error("{report}failed at '{path}': {source}")]
    Interrupted {
        report: String,
        path: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("sync ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("sync scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("sync remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("sync I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// `true` when the operation was planned against state that has since
    /// moved. Re-running `get` (or re-previewing) resolves it.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::StaleMergePreview { .. } | Self::RemoteMoved { .. } | Self::LocalChanged(_)
        )
    }
}

fn tab_list(paths: &[String]) -> String {
    paths.iter().map(|p| format!("\n\t{p}")).collect()
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
