//! On-disk layout of a recipe working copy.
//!
//! ```text
//! <recipe_dir>/
//!   <metadata_dir>/        (default `.dk`)
//!     FILE_SHA             path:sha lines, sorted
//!     ORIG_HEAD            remote revision of the last sync
//!     RECIPE_META          TOML: recipe name, last sync time
//!     objects/<hh>/<rest>  base snapshots
//!   ...recipe files...
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, SyncError};
use crate::ledger::ContentHashLedger;
use crate::snapshots::SnapshotStore;

pub const RECIPE_META: &str = "RECIPE_META";

/// Identifies which remote recipe a working copy mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMeta {
    pub recipe: String,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Paths of one working copy.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    root: PathBuf,
    meta_dir: PathBuf,
}

impl WorkingCopy {
    pub fn new(root: impl Into<PathBuf>, metadata_dir: &str) -> Self {
        let root = root.into();
        let meta_dir = root.join(metadata_dir);
        Self { root, meta_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    pub fn has_metadata(&self) -> bool {
        self.meta_dir.is_dir()
    }

    /// `true` if the root is missing or contains no entries at all.
    pub fn is_empty_dir(&self) -> Result<bool, SyncError> {
        if !self.root.exists() {
            return Ok(true);
        }
        Ok(std::fs::read_dir(&self.root)?.next().is_none())
    }

    /// Refuse to operate on a populated directory we did not check out.
    pub fn ensure_working_copy(&self) -> Result<(), SyncError> {
        if self.has_metadata() {
            return Ok(());
        }
        Err(SyncError::NotARecipeWorkingCopy(self.root.clone()))
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn load_ledger(&self) -> Result<ContentHashLedger, LedgerError> {
        ContentHashLedger::load(&self.meta_dir)
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(&self.meta_dir)
    }

    pub fn load_meta(&self) -> Result<Option<RecipeMeta>, LedgerError> {
        let path = self.meta_dir.join(RECIPE_META);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let meta = toml::from_str(&contents).map_err(|e| LedgerError::CorruptMeta {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        Ok(Some(meta))
    }

    pub fn save_meta(&self, meta: &RecipeMeta) -> Result<(), LedgerError> {
        std::fs::create_dir_all(&self.meta_dir)?;
        let path = self.meta_dir.join(RECIPE_META);
        let body = toml::to_string(meta).map_err(|e| LedgerError::CorruptMeta {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        std::fs::write(path, body)?;
        Ok(())
    }

    pub fn read_file(&self, rel: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.abs(rel))
    }

    /// Write a file, creating parent directories as needed.
    pub fn write_file(&self, rel: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.abs(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    }

    pub fn create_dir(&self, rel: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.abs(rel))
    }

    pub fn delete_file(&self, rel: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.abs(rel))
    }

    /// Remove a directory that should be empty by now.
    pub fn delete_dir(&self, rel: &str) -> std::io::Result<()> {
        std::fs::remove_dir(self.abs(rel))
    }
}
