//! Content-addressed store of base file versions.
//!
//! The ledger only knows hashes; three-way merging needs the bytes of the
//! common ancestor. Every synced version is kept under
//! `objects/<hh>/<rest>` in the metadata directory, keyed by its SHA-1.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::LedgerError;
use crate::models::FileHash;

const OBJECTS_DIR: &str = "objects";

/// Snapshot store rooted at a working copy's metadata directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    objects: PathBuf,
}

impl SnapshotStore {
    pub fn new(meta_dir: &Path) -> Self {
        Self {
            objects: meta_dir.join(OBJECTS_DIR),
        }
    }

    fn object_path(&self, hash: &FileHash) -> PathBuf {
        let (head, rest) = hash.as_str().split_at(2);
        self.objects.join(head).join(rest)
    }

    /// Store `bytes`; a no-op when the object already exists.
    pub fn put(&self, bytes: &[u8]) -> Result<FileHash, LedgerError> {
        let hash = FileHash::of(bytes);
        let path = self.object_path(&hash);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, bytes)?;
            debug!(hash = %hash, "stored base snapshot");
        }
        Ok(hash)
    }

    pub fn get(&self, hash: &FileHash) -> Result<Option<Vec<u8>>, LedgerError> {
        let path = self.object_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    pub fn contains(&self, hash: &FileHash) -> bool {
        self.object_path(hash).exists()
    }

    /// Delete every object not in `keep`. Returns how many were removed.
    pub fn prune(&self, keep: &BTreeSet<&FileHash>) -> Result<usize, LedgerError> {
        if !self.objects.exists() {
            return Ok(0);
        }
        let keep: BTreeSet<&str> = keep.iter().map(|h| h.as_str()).collect();
        let mut removed = 0;

        for shard in std::fs::read_dir(&self.objects)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let head = shard.file_name().to_string_lossy().into_owned();
            for object in std::fs::read_dir(shard.path())? {
                let object = object?;
                let name = format!("{head}{}", object.file_name().to_string_lossy());
                if !keep.contains(name.as_str()) {
                    std::fs::remove_file(object.path())?;
                    removed += 1;
                }
            }
            if std::fs::read_dir(shard.path())?.next().is_none() {
                std::fs::remove_dir(shard.path())?;
            }
        }

        if removed > 0 {
            info!(removed, "pruned unreferenced base snapshots");
        }
        Ok(removed)
    }
}
