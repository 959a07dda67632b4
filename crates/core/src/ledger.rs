//! Persistent per-file content-hash ledger.
//!
//! The ledger records the hash of every file as of its last confirmed sync
//! (`FILE_SHA`) together with the remote revision it was reconciled against
//! (`ORIG_HEAD`). Both live in the working copy's metadata directory.
//!
//! Entries are never dropped because a file disappeared locally. Only a
//! confirmed remote deletion removes one, which is what lets a later pull
//! tell "deleted locally, restore it" apart from "gone everywhere".

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::errors::LedgerError;
use crate::models::{FileHash, RelativePath};

/// File name of the path→hash ledger inside the metadata directory.
pub const FILE_SHA: &str = "FILE_SHA";
/// File name of the last-synced remote revision inside the metadata directory.
pub const ORIG_HEAD: &str = "ORIG_HEAD";

/// Last-synced hash per path plus the remote revision of the last sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentHashLedger {
    entries: BTreeMap<RelativePath, FileHash>,
    orig_head: Option<String>,
}

impl ContentHashLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the ledger from `meta_dir`. Missing files yield an empty ledger.
    pub fn load(meta_dir: &Path) -> Result<Self, LedgerError> {
        let sha_path = meta_dir.join(FILE_SHA);
        let mut ledger = Self::new();

        if sha_path.exists() {
            let contents = std::fs::read_to_string(&sha_path)?;
            for (idx, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let corrupt = |detail: String| LedgerError::CorruptLedger {
                    path: sha_path.clone(),
                    line: idx + 1,
                    detail,
                };
                let (path, hash) = line
                    .rsplit_once(':')
                    .ok_or_else(|| corrupt("expected '<path>:<sha>'".into()))?;
                if path.is_empty() {
                    return Err(corrupt("empty path".into()));
                }
                let hash: FileHash = hash.trim().parse().map_err(corrupt)?;
                ledger.entries.insert(path.to_string(), hash);
            }
        }

        let head_path = meta_dir.join(ORIG_HEAD);
        if head_path.exists() {
            let head = std::fs::read_to_string(&head_path)?;
            let head = head.trim();
            if !head.is_empty() {
                ledger.orig_head = Some(head.to_string());
            }
        }

        debug!(
            entries = ledger.entries.len(),
            orig_head = ?ledger.orig_head,
            "loaded ledger"
        );
        Ok(ledger)
    }

    /// Write `FILE_SHA` (sorted `path:hash` lines) and `ORIG_HEAD`.
    pub fn save(&self, meta_dir: &Path) -> Result<(), LedgerError> {
        std::fs::create_dir_all(meta_dir)?;

        let mut body = String::new();
        for (path, hash) in &self.entries {
            body.push_str(path);
            body.push(':');
            body.push_str(hash.as_str());
            body.push('\n');
        }
        write_atomic(meta_dir, FILE_SHA, body.as_bytes())?;

        match &self.orig_head {
            Some(head) => write_atomic(meta_dir, ORIG_HEAD, format!("{head}\n").as_bytes())?,
            None => {
                let head_path = meta_dir.join(ORIG_HEAD);
                if head_path.exists() {
                    std::fs::remove_file(head_path)?;
                }
            }
        }

        info!(entries = self.entries.len(), "saved ledger");
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&FileHash> {
        self.entries.get(path)
    }

    /// Idempotent upsert.
    pub fn set(&mut self, path: impl Into<RelativePath>, hash: FileHash) {
        self.entries.insert(path.into(), hash);
    }

    /// Drop an entry. Only for confirmed remote deletions.
    pub fn remove(&mut self, path: &str) -> Option<FileHash> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<RelativePath, FileHash> {
        &self.entries
    }

    pub fn orig_head(&self) -> Option<&str> {
        self.orig_head.as_deref()
    }

    pub fn set_orig_head(&mut self, revision: impl Into<String>) {
        self.orig_head = Some(revision.into());
    }
}

/// Write through a temp file in the same directory, then rename over `name`.
fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), LedgerError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name)).map_err(|e| e.error)?;
    Ok(())
}
