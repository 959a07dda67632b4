//! Line-based three-way merge (diff3).
//!
//! Base→local and base→remote are aligned independently with the Myers LCS
//! from `similar`. Base lines matched on both sides are stable; everything
//! between two stable lines forms a chunk that is resolved on its own.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffOp};
use tracing::{debug, info};

pub const LOCAL_MARKER: &str = "<<<<<<< LOCAL\n";
pub const SEPARATOR_MARKER: &str = "=======\n";
pub const REMOTE_MARKER: &str = ">>>>>>> REMOTE\n";

/// Outcome of merging one file. A conflict is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum MergeResult {
    /// Local and remote edits touched disjoint regions.
    Clean(String),
    /// At least one region diverged; the content carries conflict markers.
    Conflict(String),
}

impl MergeResult {
    pub fn content(&self) -> &str {
        match self {
            Self::Clean(c) | Self::Conflict(c) => c,
        }
    }

    pub fn into_content(self) -> String {
        match self {
            Self::Clean(c) | Self::Conflict(c) => c,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Stateless three-way merge engine.
pub struct MergeEngine;

impl MergeEngine {
    /// Merge `local` and `remote`, both derived from `base`.
    pub fn merge(base: &str, local: &str, remote: &str) -> MergeResult {
        if local == base || local == remote {
            debug!("local side unchanged or identical to remote");
            return MergeResult::Clean(remote.to_string());
        }
        if remote == base {
            debug!("remote side unchanged");
            return MergeResult::Clean(local.to_string());
        }

        let base: Vec<&str> = base.split_inclusive('\n').collect();
        let local: Vec<&str> = local.split_inclusive('\n').collect();
        let remote: Vec<&str> = remote.split_inclusive('\n').collect();
        let result = Self::merge_lines(&base, &local, &remote);

        info!(conflict = result.is_conflict(), "three-way merge complete");
        result
    }

    /// Merge pre-split lines. Each line keeps its own terminator, so the
    /// last line may lack one.
    pub fn merge_lines(base: &[&str], local: &[&str], remote: &[&str]) -> MergeResult {
        let to_local = align(base, local);
        let to_remote = align(base, remote);

        let mut out = String::new();
        let mut conflicts = 0usize;
        let (mut i, mut j, mut k) = (0, 0, 0);

        loop {
            // Next base line anchored on both sides.
            let next = (i..base.len()).find_map(|n| match (to_local[n], to_remote[n]) {
                (Some(lj), Some(rk)) => Some((n, lj, rk)),
                _ => None,
            });

            match next {
                Some((n, lj, rk)) if n == i && lj == j && rk == k => {
                    out.push_str(base[i]);
                    i += 1;
                    j += 1;
                    k += 1;
                }
                Some((n, lj, rk)) => {
                    let chunk = Chunk {
                        base: &base[i..n],
                        local: &local[j..lj],
                        remote: &remote[k..rk],
                    };
                    conflicts += chunk.resolve_into(&mut out);
                    (i, j, k) = (n, lj, rk);
                }
                None => {
                    let chunk = Chunk {
                        base: &base[i..],
                        local: &local[j..],
                        remote: &remote[k..],
                    };
                    conflicts += chunk.resolve_into(&mut out);
                    break;
                }
            }
        }

        if conflicts > 0 {
            debug!(conflicts, "merge produced conflict regions");
            MergeResult::Conflict(out)
        } else {
            MergeResult::Clean(out)
        }
    }
}

/// For each base line, the index of its matching line in `other`.
fn align(base: &[&str], other: &[&str]) -> Vec<Option<usize>> {
    let mut matched = vec![None; base.len()];
    for op in similar::capture_diff_slices(Algorithm::Myers, base, other) {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for offset in 0..len {
                matched[old_index + offset] = Some(new_index + offset);
            }
        }
    }
    matched
}

/// One unstable region between two stable base lines.
struct Chunk<'a> {
    base: &'a [&'a str],
    local: &'a [&'a str],
    remote: &'a [&'a str],
}

impl Chunk<'_> {
    /// Append the resolution to `out`; returns 1 if it had to be marked.
    fn resolve_into(&self, out: &mut String) -> usize {
        if self.local == self.base {
            out.extend(self.remote.iter().copied());
            return 0;
        }
        if self.remote == self.base || self.local == self.remote {
            out.extend(self.local.iter().copied());
            return 0;
        }

        out.push_str(LOCAL_MARKER);
        push_region(out, self.local);
        out.push_str(SEPARATOR_MARKER);
        push_region(out, self.remote);
        out.push_str(REMOTE_MARKER);
        1
    }
}

/// Markers always start on a fresh line.
fn push_region(out: &mut String, lines: &[&str]) {
    out.extend(lines.iter().copied());
    if lines.last().is_some_and(|l| !l.ends_with('\n')) {
        out.push('\n');
    }
}
