//! A remote whose recipes are plain directories under one root.
//!
//! ```text
//! <root>/
//!   .revisions/<recipe>   current revision id (uuid v4)
//!   <recipe>/...          recipe files
//! ```
//!
//! Every push or delete rotates the recipe's revision id.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use super::{call_failed, RecipeRemote, RemoteOp};
use crate::errors::RemoteError;
use crate::models::{normalize_path, Manifest};
use crate::scanner::TreeScanner;

const REVISIONS_DIR: &str = ".revisions";

/// Directory-backed [`RecipeRemote`].
#[derive(Debug, Clone)]
pub struct DirectoryRemote {
    root: PathBuf,
    scanner: TreeScanner,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>, scanner: TreeScanner) -> Self {
        Self {
            root: root.into(),
            scanner,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn recipe_dir(&self, recipe: &str) -> Result<PathBuf, RemoteError> {
        let valid = !recipe.is_empty()
            && recipe != REVISIONS_DIR
            && !recipe.starts_with('.')
            && !recipe.contains(['/', '\\']);
        let dir = self.root.join(recipe);
        if !valid || !dir.is_dir() {
            return Err(RemoteError::RecipeNotFound(recipe.to_string()));
        }
        Ok(dir)
    }

    fn file_path(&self, recipe: &str, path: &str, op: RemoteOp) -> Result<PathBuf, RemoteError> {
        let rel = normalize_path(path).map_err(|e| call_failed(op, path, e))?;
        Ok(self.recipe_dir(recipe)?.join(rel))
    }

    fn revision_path(&self, recipe: &str) -> PathBuf {
        self.root.join(REVISIONS_DIR).join(recipe)
    }

    fn rotate_revision(&self, recipe: &str) -> Result<String, RemoteError> {
        let path = self.revision_path(recipe);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let revision = Uuid::new_v4().to_string();
        std::fs::write(&path, format!("{revision}\n"))?;
        debug!(recipe, revision = revision.as_str(), "rotated remote revision");
        Ok(revision)
    }

    /// Remove now-empty directories between `path` and the recipe root.
    fn prune_empty_parents(recipe_dir: &Path, path: &Path) -> Result<(), RemoteError> {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == recipe_dir || !dir.starts_with(recipe_dir) {
                break;
            }
            if std::fs::read_dir(dir)?.next().is_some() {
                break;
            }
            std::fs::remove_dir(dir)?;
            current = dir.parent();
        }
        Ok(())
    }
}

impl RecipeRemote for DirectoryRemote {
    fn manifest(&self, recipe: &str) -> Result<Manifest, RemoteError> {
        let dir = self.recipe_dir(recipe)?;
        self.scanner
            .scan(&dir)
            .map_err(|e| call_failed(RemoteOp::Manifest, recipe, e))
    }

    fn fetch(&self, recipe: &str, path: &str) -> Result<Vec<u8>, RemoteError> {
        let file = self.file_path(recipe, path, RemoteOp::Fetch)?;
        if !file.is_file() {
            return Err(RemoteError::FileNotFound {
                recipe: recipe.to_string(),
                path: path.to_string(),
            });
        }
        Ok(std::fs::read(file)?)
    }

    fn push(
        &self,
        recipe: &str,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<(), RemoteError> {
        let file = self.file_path(recipe, path, RemoteOp::Push)?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&file, bytes)?;
        self.rotate_revision(recipe)?;
        info!(recipe, path, message, "pushed file to directory remote");
        Ok(())
    }

    fn delete(&self, recipe: &str, path: &str, message: &str) -> Result<(), RemoteError> {
        let file = self.file_path(recipe, path, RemoteOp::Delete)?;
        if !file.is_file() {
            return Err(RemoteError::FileNotFound {
                recipe: recipe.to_string(),
                path: path.to_string(),
            });
        }
        std::fs::remove_file(&file)?;
        Self::prune_empty_parents(&self.recipe_dir(recipe)?, &file)?;
        self.rotate_revision(recipe)?;
        info!(recipe, path, message, "deleted file from directory remote");
        Ok(())
    }

    fn revision(&self, recipe: &str) -> Result<String, RemoteError> {
        self.recipe_dir(recipe)?;
        let path = self.revision_path(recipe);
        if path.exists() {
            let revision = std::fs::read_to_string(&path)?;
            let revision = revision.trim();
            if !revision.is_empty() {
                return Ok(revision.to_string());
            }
        }
        self.rotate_revision(recipe)
    }
}
