//! Targetscope git adapter
//!
//! A typed wrapper around the `git` binary: revision resolution, dirty-file
//! enumeration, checkouts, and worktree plumbing. Like the Bazel adapter, it
//! captures streams and exit status but encodes no engine policy.

mod command;
pub mod repo;
pub mod revision;

pub use command::GitError;
pub use repo::{
    checkout, clean_checkout, create_worktree, rev_parse, status, status_filtered,
    update_submodules, FileStatus,
};
pub use revision::{GitRev, LabelledGitRev};
