//! The remote recipe store, as seen by the sync engine.
//!
//! [`RecipeRemote`] is the capability boundary to whatever service hosts the
//! canonical recipes. Retries and timeouts belong to implementations; the
//! engine sees a single [`RemoteError::CallFailed`] per failed call.

pub mod directory;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::errors::RemoteError;
use crate::models::{is_ancestor, Manifest, RelativePath};

pub use directory::DirectoryRemote;
pub use memory::MemoryRemote;

/// Remote calls, as named in errors and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RemoteOp {
    Manifest,
    Fetch,
    Push,
    Delete,
    Revision,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest => write!(f, "manifest"),
            Self::Fetch => write!(f, "fetch"),
            Self::Push => write!(f, "push"),
            Self::Delete => write!(f, "delete"),
            Self::Revision => write!(f, "revision"),
        }
    }
}

/// A store of named recipes, each a tree of files.
pub trait RecipeRemote {
    /// Current file hashes and directories of `recipe`.
    fn manifest(&self, recipe: &str) -> Result<Manifest, RemoteError>;

    /// Content of one file.
    fn fetch(&self, recipe: &str, path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Create or replace one file.
    fn push(&self, recipe: &str, path: &str, bytes: &[u8], message: &str)
        -> Result<(), RemoteError>;

    /// Delete one file.
    fn delete(&self, recipe: &str, path: &str, message: &str) -> Result<(), RemoteError>;

    /// Opaque id that changes whenever `recipe` changes.
    fn revision(&self, recipe: &str) -> Result<String, RemoteError>;

    /// Every file at or beneath `root`, keyed by recipe-relative path.
    fn fetch_subtree(
        &self,
        recipe: &str,
        root: &str,
    ) -> Result<BTreeMap<RelativePath, Vec<u8>>, RemoteError> {
        let manifest = self.manifest(recipe)?;
        let mut files = BTreeMap::new();
        for path in manifest.files.keys() {
            if path == root || is_ancestor(root, path) {
                files.insert(path.clone(), self.fetch(recipe, path)?);
            }
        }
        debug!(recipe, root, files = files.len(), "fetched remote subtree");
        Ok(files)
    }
}

impl<R: RecipeRemote + ?Sized> RecipeRemote for &R {
    fn manifest(&self, recipe: &str) -> Result<Manifest, RemoteError> {
        (**self).manifest(recipe)
    }

    fn fetch(&self, recipe: &str, path: &str) -> Result<Vec<u8>, RemoteError> {
        (**self).fetch(recipe, path)
    }

    fn push(
        &self,
        recipe: &str,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<(), RemoteError> {
        (**self).push(recipe, path, bytes, message)
    }

    fn delete(&self, recipe: &str, path: &str, message: &str) -> Result<(), RemoteError> {
        (**self).delete(recipe, path, message)
    }

    fn revision(&self, recipe: &str) -> Result<String, RemoteError> {
        (**self).revision(recipe)
    }

    fn fetch_subtree(
        &self,
        recipe: &str,
        root: &str,
    ) -> Result<BTreeMap<RelativePath, Vec<u8>>, RemoteError> {
        (**self).fetch_subtree(recipe, root)
    }
}

/// Build a [`RemoteError::CallFailed`].
pub(crate) fn call_failed(op: RemoteOp, path: &str, detail: impl fmt::Display) -> RemoteError {
    RemoteError::CallFailed {
        op: op.to_string(),
        path: path.to_string(),
        detail: detail.to_string(),
    }
}
