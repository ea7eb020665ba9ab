//! Targetscope engine
//!
//! The change-detection pipeline over two snapshots of a source tree:
//! content-addressed target hashing with a freeze point, parallel prefill,
//! per-revision query orchestration, revision and workspace control, and the
//! diff walker that explains each affected target.

pub mod checkout;
pub mod context;
pub mod driver;
pub mod file_hash;
mod prefill;
pub mod query;
pub mod target_hash;
pub mod walker;

use thiserror::Error;

pub use checkout::CheckoutError;
pub use context::{
    AnalysisCacheClearStrategy, BeforeQueryErrorBehavior, Context, EnforceClean, InvalidPolicyValue,
};
pub use file_hash::FileHashCache;
pub use prefill::{PrefillError, WORKER_COUNT_ENV};
pub use query::{MatchingTargets, QueryError, QueryResults, TargetsList};
pub use target_hash::{HashError, LabelAndConfigurations, TargetContext, TargetHashCache};
pub use walker::{diff_single_label, walk_affected_targets, walk_diffs, WalkCallback};

/// Any failure the engine can surface to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Git(#[from] targetscope_git::GitError),

    #[error("failed to query {revision}: {message}")]
    QueryFailed { revision: String, message: String },

    #[error("failed to check out original commit during cleanup: {source}")]
    RestoreOriginal {
        #[source]
        source: targetscope_git::GitError,
    },
}
