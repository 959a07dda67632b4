//! Local tree scanning.
//!
//! [`TreeScanner`] walks a recipe working copy and produces a [`Manifest`]
//! of file hashes and directories, skipping the metadata directory and any
//! path matched by the configured [`IgnoreRules`].
//!
//! An unreadable path aborts the whole scan: a partial manifest would make
//! missing files look like local deletions downstream. Entries whose names
//! are not valid UTF-8 can never be tracked, so they are skipped with a
//! warning instead.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::ScanError;
use crate::models::{normalize_path, FileHash, Manifest};

// ---------------------------------------------------------------------------
// Ignore rules
// ---------------------------------------------------------------------------

/// Glob patterns excluded from scans, matched against the *relative* path.
///
/// Supports:
/// - `*`: match within a single path segment
/// - `**`: match zero or more path segments
/// - `*.ext`: match by extension
/// - `dir/**`: match a directory and everything under it
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn new(patterns: Vec<String>) -> Self {
        let patterns = patterns.into_iter().map(|p| p.replace('\\', "/")).collect();
        Self { patterns }
    }

    /// The first pattern matching a file path, if any.
    pub fn matching_file(&self, rel_path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pat| glob_match::glob_match(pat, rel_path))
            .map(String::as_str)
    }

    /// The first pattern matching a directory path, if any.
    ///
    /// `dir/**` matches the directory `dir` itself, so the walk never
    /// descends into it.
    pub fn matching_dir(&self, rel_path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pat| {
                glob_match::glob_match(pat, rel_path)
                    || pat
                        .strip_suffix("/**")
                        .is_some_and(|prefix| glob_match::glob_match(prefix, rel_path))
            })
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Walks a working tree and hashes every file.
#[derive(Debug, Clone)]
pub struct TreeScanner {
    metadata_dir: String,
    ignore: IgnoreRules,
}

impl TreeScanner {
    pub fn new(metadata_dir: impl Into<String>, ignore: IgnoreRules) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
            ignore,
        }
    }

    /// Produce the manifest of `root`. A missing root yields an empty manifest.
    pub fn scan(&self, root: &Path) -> Result<Manifest, ScanError> {
        let mut manifest = Manifest::new();
        if !root.exists() {
            debug!(root = %root.display(), "scan root does not exist");
            return Ok(manifest);
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(root, entry));

        for entry in walker {
            let entry = entry.map_err(|e| walk_error(root, e))?;
            let rel = relative(root, entry.path())?;

            let file_type = entry.file_type();
            if file_type.is_dir() {
                manifest.insert_dir(rel);
            } else if file_type.is_file() || self.symlink_to_file(entry.path()) {
                let bytes = std::fs::read(entry.path()).map_err(|source| ScanError::Io {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
                manifest.insert_file(rel, FileHash::of(&bytes));
            } else {
                debug!(path = %entry.path().display(), "skipping non-regular entry");
            }
        }

        info!(
            root = %root.display(),
            files = manifest.files.len(),
            dirs = manifest.dirs.len(),
            "scanned working tree"
        );
        Ok(manifest)
    }

    fn is_excluded(&self, root: &Path, entry: &walkdir::DirEntry) -> bool {
        if entry.file_name().to_str().is_none() {
            warn!(path = %entry.path().display(), "skipping entry with a non UTF-8 name");
            return true;
        }
        let Ok(rel) = relative(root, entry.path()) else {
            return false;
        };
        if entry.depth() == 1 && rel == self.metadata_dir {
            return true;
        }
        let hit = if entry.file_type().is_dir() {
            self.ignore.matching_dir(&rel)
        } else {
            self.ignore.matching_file(&rel)
        };
        if let Some(pattern) = hit {
            debug!(path = rel.as_str(), pattern, "path matches ignore pattern");
            return true;
        }
        false
    }

    fn symlink_to_file(&self, path: &Path) -> bool {
        std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }
}

fn relative(root: &Path, path: &Path) -> Result<String, ScanError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ScanError::InvalidPath(path.display().to_string()))?;
    let rel = rel
        .to_str()
        .ok_or_else(|| ScanError::InvalidPath(path.display().to_string()))?;
    normalize_path(rel)
}

fn walk_error(root: &Path, err: walkdir::Error) -> ScanError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(root));
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
    ScanError::Io { path, source }
}
