//! Domain model types shared by the scanner, ledger, classifier and engine.
//!
//! Paths are plain `String`s in normalized relative form (see
//! [`normalize_path`]); they are the universal key across all components.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::errors::ScanError;

/// A slash-separated path relative to the recipe root.
pub type RelativePath = String;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Normalize a relative path: forward slashes only, no leading `./`, no
/// trailing slash, no empty or `.` segments.
///
/// Absolute paths and `..` segments are rejected since they would escape the
/// recipe root.
pub fn normalize_path(raw: &str) -> Result<RelativePath, ScanError> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(ScanError::InvalidPath(raw.to_string()));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ScanError::InvalidPath(raw.to_string())),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(ScanError::InvalidPath(raw.to_string()));
    }
    Ok(segments.join("/"))
}

/// Parent directory of a normalized path, or `None` at the recipe root.
pub fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// `true` if `ancestor` is a proper ancestor directory of `path`.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Number of segments in a normalized path.
pub fn depth(path: &str) -> usize {
    path.split('/').count()
}

// ---------------------------------------------------------------------------
// FileHash
// ---------------------------------------------------------------------------

/// A 40-character lowercase hex SHA-1 digest of a file's exact bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Digest `bytes`. Empty content hashes like any other content.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("'{s}' is not a 40-character hex digest"));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for FileHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.0
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The state of a tree at one point: file hashes plus the directory set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: BTreeMap<RelativePath, FileHash>,
    pub dirs: BTreeSet<RelativePath>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from file contents, deriving every ancestor directory.
    pub fn from_contents<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut manifest = Self::new();
        for (path, bytes) in files {
            manifest.insert_file(path.to_string(), FileHash::of(bytes));
        }
        manifest
    }

    /// Record a file and all of its ancestor directories.
    pub fn insert_file(&mut self, path: RelativePath, hash: FileHash) {
        let mut parent = parent_of(&path);
        while let Some(dir) = parent {
            if !self.dirs.insert(dir.to_string()) {
                break;
            }
            parent = parent_of(dir);
        }
        self.files.insert(path, hash);
    }

    pub fn insert_dir(&mut self, path: RelativePath) {
        self.dirs.insert(path);
    }

    pub fn file_hash(&self, path: &str) -> Option<&FileHash> {
        self.files.get(path)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Paths recorded as a file here and as a directory in `other` (or vice versa).
    pub fn kind_mismatches(&self, other: &Manifest) -> Vec<RelativePath> {
        let mut mismatches: Vec<RelativePath> = self
            .files
            .keys()
            .filter(|p| other.dirs.contains(*p))
            .chain(self.dirs.iter().filter(|p| other.files.contains_key(*p)))
            .cloned()
            .collect();
        mismatches.sort();
        mismatches.dedup();
        mismatches
    }
}
