//! RecipeSync core library.
//!
//! This crate keeps a local recipe working copy in sync with a remote recipe
//! store: tree scanning, the content-hash ledger and base snapshots,
//! three-way classification and merging, and the pull / push engine.

pub mod config;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod plan;
pub mod reducer;
pub mod remote;
pub mod scanner;
pub mod snapshots;
pub mod sync_engine;
pub mod three_way;
pub mod working_copy;

// Re-exports for convenience.
pub use config::AppConfig;
pub use errors::{CoreError, SyncError};
pub use ledger::ContentHashLedger;
pub use models::{FileHash, Manifest, RelativePath};
pub use plan::{PullOptions, PullReport, PushOptions, PushReport, StatusReport};
pub use reducer::PathSetReducer;
pub use remote::{DirectoryRemote, MemoryRemote, RecipeRemote};
pub use scanner::{IgnoreRules, TreeScanner};
pub use sync_engine::{SyncEngine, SyncMode};
pub use three_way::{MergeEngine, MergeResult, SyncStatus, ThreeWayClassifier};
