//! Reduction of requested paths to the minimal set of fetch roots.

use std::collections::BTreeSet;

use crate::models::{depth, is_ancestor, RelativePath};

/// Computes which subtrees to request so every input path is covered.
pub struct PathSetReducer;

impl PathSetReducer {
    /// Drop every path that has a proper ancestor in the input.
    ///
    /// Paths are taken shallowest first, so an ancestor is always considered
    /// before anything beneath it.
    pub fn reduce<'a, I>(paths: I) -> BTreeSet<RelativePath>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ordered: Vec<&str> = paths.into_iter().collect();
        ordered.sort_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));
        ordered.dedup();

        let mut roots: BTreeSet<RelativePath> = BTreeSet::new();
        for path in ordered {
            if !roots.iter().any(|root| is_ancestor(root, path)) {
                roots.insert(path.to_string());
            }
        }
        roots
    }
}
