//! Three-way comparison of base, local and remote.
//!
//! - [`classifier`] assigns every path a [`SyncStatus`].
//! - [`merger`] merges the content of files modified on both sides.

pub mod classifier;
pub mod merger;

pub use classifier::{Classification, StatusSummary, SyncStatus, ThreeWayClassifier};
pub use merger::{MergeEngine, MergeResult};
