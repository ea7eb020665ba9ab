//! Revision and workspace control
//!
//! Decides how to get a revision onto disk: an in-place checkout when the
//! tree is clean, or a cached sibling worktree when it is not (or becomes
//! unclean after checkout, e.g. through submodule or `.gitignore` changes).
//! The worktree path is deterministic in the origin path so later
//! invocations reuse it.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use targetscope_core::RelPath;
use targetscope_git::{self as git, GitError, LabelledGitRev};

use crate::context::{Context, EnforceClean};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("repository was not clean before checking out {revision}")]
    UncleanBeforeCheckout { revision: String },

    #[error("repository was not clean after checking out {revision}")]
    UncleanAfterCheckout { revision: String },

    #[error("failed to locate a user cache directory for worktrees")]
    NoCacheDir,

    #[error("failed to create worktree cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove worktree directory {path}: {source}")]
    RemoveWorktree {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether the working tree is clean, ignoring files under the configured
/// prefixes. Dirty files are logged so the user can see what blocked an
/// in-place checkout.
pub fn ensure_clean(workspace: &Path, ignored_files: &[RelPath]) -> Result<bool, GitError> {
    let dirty = git::status_filtered(workspace, ignored_files)?;
    if dirty.is_empty() {
        return Ok(true);
    }
    warn!("current working tree has {} non-ignored changed or untracked files:", dirty.len());
    for file_status in &dirty {
        warn!("{file_status}");
    }
    Ok(false)
}

/// Check out a revision without destroying local state.
///
/// Returns the path of the worktree used, or `None` when the checkout
/// happened in place. When a worktree is used, the origin repository may or
/// may not have the revision checked out. Submodules are initialised in
/// whichever tree will be queried.
pub fn safe_checkout(context: &Context, rev: &LabelledGitRev) -> Result<Option<PathBuf>, CheckoutError> {
    let (Some(checkout_ref), Some(sha)) = (rev.rev.checkout_ref(), rev.rev.sha()) else {
        return Ok(None);
    };
    let workspace = &context.workspace_path;
    let allow_dirty = context.enforce_clean == EnforceClean::AllowDirty;

    let mut use_worktree = false;
    let pre_checkout_clean = allow_dirty || ensure_clean(workspace, &context.ignored_files)?;
    if !pre_checkout_clean {
        if context.enforce_clean == EnforceClean::EnforceClean {
            return Err(CheckoutError::UncleanBeforeCheckout { revision: rev.to_string() });
        }
        warn!(
            "workspace is unclean, using git worktree; this will be slower the first time \
             (commit local changes and ignore untracked files to avoid it)"
        );
        use_worktree = true;
    } else {
        git::checkout(workspace, checkout_ref)?;
        let post_checkout_clean = allow_dirty || ensure_clean(workspace, &context.ignored_files)?;
        if !post_checkout_clean {
            if context.enforce_clean == EnforceClean::EnforceClean {
                return Err(CheckoutError::UncleanAfterCheckout { revision: rev.to_string() });
            }
            warn!(
                "detected unclean repository after checkout (likely submodule or .gitignore \
                 changes); using git worktree to leave the original repository pristine"
            );
            use_worktree = true;
        }
    }

    let worktree = if use_worktree {
        Some(reuse_or_create_worktree(workspace, sha)?)
    } else {
        None
    };

    let effective = worktree.as_deref().unwrap_or(workspace);
    git::update_submodules(effective)?;
    Ok(worktree)
}

/// Reuse the cached worktree for this origin if it can be force-checked-out
/// and cleaned; otherwise remove it and create a fresh detached worktree.
fn reuse_or_create_worktree(origin: &Path, sha: &str) -> Result<PathBuf, CheckoutError> {
    let worktree_dir = worktree_cache_path(origin)?;

    if worktree_dir.exists() {
        match git::clean_checkout(&worktree_dir, sha) {
            Ok(()) => {
                info!("reusing git worktree in {}", worktree_dir.display());
                return Ok(worktree_dir);
            }
            Err(err) => {
                warn!(
                    "failed to reuse existing git worktree in {}: {err}; will re-create it",
                    worktree_dir.display()
                );
            }
        }
        std::fs::remove_dir_all(&worktree_dir).map_err(|source| CheckoutError::RemoveWorktree {
            path: worktree_dir.clone(),
            source,
        })?;
    }

    git::create_worktree(origin, &worktree_dir, sha)?;
    info!("using fresh git worktree in {}", worktree_dir.display());
    Ok(worktree_dir)
}

/// The cache path for the origin's worktree, stable between invocations:
/// `<cache-dir>/targetscope/td-worktree-<basename>-<digest of origin path>`.
pub fn worktree_cache_path(origin: &Path) -> Result<PathBuf, CheckoutError> {
    let base_dirs = directories::BaseDirs::new().ok_or(CheckoutError::NoCacheDir)?;
    let cache_dir = base_dirs.cache_dir().join("targetscope");
    std::fs::create_dir_all(&cache_dir)
        .map_err(|source| CheckoutError::CacheDir { path: cache_dir.clone(), source })?;

    let mut hasher = Sha256::new();
    hasher.update(origin.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());
    let basename = origin
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_owned());
    Ok(cache_dir.join(format!("td-worktree-{basename}-{}", &digest[..40])))
}
