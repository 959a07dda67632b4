//! In-memory remote with injectable failures.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{call_failed, RecipeRemote, RemoteOp};
use crate::errors::RemoteError;
use crate::models::{normalize_path, FileHash, Manifest, RelativePath};

#[derive(Debug, Clone, Default)]
struct MemoryRecipe {
    files: BTreeMap<RelativePath, Vec<u8>>,
    dirs: BTreeSet<RelativePath>,
    revision: u64,
}

impl MemoryRecipe {
    fn bump(&mut self) {
        self.revision += 1;
    }
}

#[derive(Debug, Default)]
struct State {
    recipes: BTreeMap<String, MemoryRecipe>,
    failures: BTreeSet<(RemoteOp, RelativePath)>,
    /// Successful push and delete calls, in order.
    mutations: Vec<(RemoteOp, RelativePath)>,
}

/// A remote held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or replace) a recipe with the given files.
    pub fn insert_recipe<'a, I>(&self, recipe: &str, files: I)
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut entry = MemoryRecipe::default();
        for (path, bytes) in files {
            entry.files.insert(path.to_string(), bytes.to_vec());
        }
        self.state().recipes.insert(recipe.to_string(), entry);
    }

    /// Write a file as if another client had pushed it.
    pub fn put_file(&self, recipe: &str, path: &str, bytes: &[u8]) {
        let mut state = self.state();
        let entry = state.recipes.entry(recipe.to_string()).or_default();
        entry.files.insert(path.to_string(), bytes.to_vec());
        entry.bump();
    }

    /// Remove a file as if another client had deleted it.
    pub fn remove_file(&self, recipe: &str, path: &str) {
        if let Some(entry) = self.state().recipes.get_mut(recipe) {
            if entry.files.remove(path).is_some() {
                entry.bump();
            }
        }
    }

    /// Add an empty directory.
    pub fn put_dir(&self, recipe: &str, path: &str) {
        let mut state = self.state();
        let entry = state.recipes.entry(recipe.to_string()).or_default();
        entry.dirs.insert(path.to_string());
        entry.bump();
    }

    pub fn file(&self, recipe: &str, path: &str) -> Option<Vec<u8>> {
        self.state()
            .recipes
            .get(recipe)
            .and_then(|r| r.files.get(path).cloned())
    }

    /// Make every `op` call on `path` fail until cleared.
    pub fn fail_on(&self, op: RemoteOp, path: &str) {
        self.state().failures.insert((op, path.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Successful push and delete calls so far.
    pub fn mutations(&self) -> Vec<(RemoteOp, RelativePath)> {
        self.state().mutations.clone()
    }

    fn check_failure(state: &State, op: RemoteOp, path: &str) -> Result<(), RemoteError> {
        if state.failures.contains(&(op, path.to_string())) {
            debug!(%op, path, "injected remote failure");
            return Err(call_failed(op, path, "injected failure"));
        }
        Ok(())
    }
}

impl RecipeRemote for MemoryRemote {
    fn manifest(&self, recipe: &str) -> Result<Manifest, RemoteError> {
        let state = self.state();
        Self::check_failure(&state, RemoteOp::Manifest, "")?;
        let entry = state
            .recipes
            .get(recipe)
            .ok_or_else(|| RemoteError::RecipeNotFound(recipe.to_string()))?;

        let mut manifest = Manifest::new();
        for dir in &entry.dirs {
            manifest.insert_dir(dir.clone());
        }
        for (path, bytes) in &entry.files {
            manifest.insert_file(path.clone(), FileHash::of(bytes));
        }
        Ok(manifest)
    }

    fn fetch(&self, recipe: &str, path: &str) -> Result<Vec<u8>, RemoteError> {
        let state = self.state();
        Self::check_failure(&state, RemoteOp::Fetch, path)?;
        let entry = state
            .recipes
            .get(recipe)
            .ok_or_else(|| RemoteError::RecipeNotFound(recipe.to_string()))?;
        entry
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::FileNotFound {
                recipe: recipe.to_string(),
                path: path.to_string(),
            })
    }

    fn push(
        &self,
        recipe: &str,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<(), RemoteError> {
        let path = normalize_path(path).map_err(|e| call_failed(RemoteOp::Push, path, e))?;
        let mut state = self.state();
        Self::check_failure(&state, RemoteOp::Push, &path)?;
        let entry = state
            .recipes
            .get_mut(recipe)
            .ok_or_else(|| RemoteError::RecipeNotFound(recipe.to_string()))?;
        entry.files.insert(path.clone(), bytes.to_vec());
        entry.bump();
        debug!(recipe, path = path.as_str(), message, "memory remote push");
        state.mutations.push((RemoteOp::Push, path));
        Ok(())
    }

    fn delete(&self, recipe: &str, path: &str, message: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        Self::check_failure(&state, RemoteOp::Delete, path)?;
        let entry = state
            .recipes
            .get_mut(recipe)
            .ok_or_else(|| RemoteError::RecipeNotFound(recipe.to_string()))?;
        if entry.files.remove(path).is_none() {
            return Err(RemoteError::FileNotFound {
                recipe: recipe.to_string(),
                path: path.to_string(),
            });
        }
        entry.bump();
        debug!(recipe, path, message, "memory remote delete");
        state.mutations.push((RemoteOp::Delete, path.to_string()));
        Ok(())
    }

    fn revision(&self, recipe: &str) -> Result<String, RemoteError> {
        let state = self.state();
        Self::check_failure(&state, RemoteOp::Revision, "")?;
        state
            .recipes
            .get(recipe)
            .map(|r| format!("rev-{}", r.revision))
            .ok_or_else(|| RemoteError::RecipeNotFound(recipe.to_string()))
    }
}
