//! Top-level sequencing over the two snapshots
//!
//! The only place that knows about both revisions at once: process the
//! before revision, restore the original checkout, process the after
//! revision, restore again. Every exit path returns the origin repository to
//! the revision it started at.

use std::path::PathBuf;

use tracing::{info, warn};

use targetscope_git::{self as git, GitRev, LabelledGitRev};

use crate::checkout::safe_checkout;
use crate::context::{BeforeQueryErrorBehavior, Context};
use crate::query::{clear_analysis_cache, query_revision, QueryResults, TargetsList};
use crate::EngineError;

/// Produce fully hashed before and after snapshots.
pub fn fully_process(
    context: &Context,
    rev_before: &LabelledGitRev,
    rev_after: &LabelledGitRev,
    targets: &TargetsList,
) -> Result<(QueryResults, QueryResults), EngineError> {
    info!("processing {rev_before}");
    let before = fully_process_revision(context, rev_before, targets)?;
    if let Some(query_error) = &before.query_error {
        match context.before_query_error_behavior {
            BeforeQueryErrorBehavior::Fatal => {
                return Err(EngineError::QueryFailed {
                    revision: rev_before.to_string(),
                    message: query_error.clone(),
                });
            }
            BeforeQueryErrorBehavior::IgnoreAndBuildAll => {
                warn!(
                    "a query error occurred querying {rev_before} - ignoring the error and \
                     treating all matching targets from the '{}' revision as affected; \
                     error querying: {query_error}",
                    rev_after.label
                );
            }
        }
    }

    // At this point the working tree is back in its original state.
    info!("processing {rev_after}");
    let after = fully_process_revision(context, rev_after, targets)?;
    if let Some(query_error) = &after.query_error {
        return Err(EngineError::QueryFailed {
            revision: rev_after.to_string(),
            message: query_error.clone(),
        });
    }

    Ok((before, after))
}

/// Process one revision, returning the origin repository to the original
/// revision on every exit path.
fn fully_process_revision(
    context: &Context,
    rev: &LabelledGitRev,
    targets: &TargetsList,
) -> Result<QueryResults, EngineError> {
    let result = process_revision(context, rev, targets);

    let restore = match context.original_revision.rev.checkout_ref() {
        Some(reference) => git::checkout(&context.workspace_path, reference),
        None => Ok(()),
    };

    match (result, restore) {
        (Err(err), _) => Err(err),
        (Ok(_), Err(source)) => Err(EngineError::RestoreOriginal { source }),
        (Ok(query_results), Ok(())) => Ok(query_results),
    }
}

fn process_revision(
    context: &Context,
    rev: &LabelledGitRev,
    targets: &TargetsList,
) -> Result<QueryResults, EngineError> {
    let (query_results, _worktree_cleanup) = load_incomplete_metadata(context, rev, targets)?;
    if query_results.query_error.is_some() {
        // The snapshot is an empty "before" stand-in; nothing to hash.
        return Ok(query_results);
    }

    info!("hashing targets");
    query_results.prefill_cache()?;
    Ok(query_results)
}

/// Removes a worktree at the end of a revision's processing when the
/// invocation asked not to cache it.
struct WorktreeCleanup {
    path: Option<PathBuf>,
}

impl Drop for WorktreeCleanup {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Err(err) = std::fs::remove_dir_all(path) {
                warn!("failed to clean up temporary git worktree at {}: {err}", path.display());
            }
        }
    }
}

/// Load the metadata about, but not hashes of, one revision's targets.
///
/// This may check out `rev`, in the origin workspace or in a worktree, and
/// runs the queries there. The caller owns returning the origin to its
/// original revision; the returned guard owns deleting the worktree when the
/// context asks for that.
fn load_incomplete_metadata(
    context: &Context,
    rev: &LabelledGitRev,
    targets: &TargetsList,
) -> Result<(QueryResults, WorktreeCleanup), EngineError> {
    let mut workspace = context.workspace_path.clone();
    let mut worktree_cleanup = WorktreeCleanup { path: None };

    if let GitRev::Commit { .. } = rev.rev {
        match safe_checkout(context, rev) {
            Ok(Some(worktree)) => {
                if context.delete_cached_worktree {
                    worktree_cleanup.path = Some(worktree.clone());
                }
                workspace = worktree;
            }
            Ok(None) => {}
            Err(err) => return Err(err.into()),
        }
    }

    let mut results_before_clear: Option<QueryResults> = None;
    if context.compare_queries_around_cache_clear {
        let results = query_revision(context, &workspace, targets)?;
        if results.query_error.is_some() {
            return Ok((results, worktree_cleanup));
        }
        results_before_clear = Some(results);
    }

    // cquery configurations can leak across invocations through the
    // analysis cache, so optionally clear it before the authoritative query.
    clear_analysis_cache(context, &workspace)?;

    let query_results = query_revision(context, &workspace, targets)?;
    if query_results.query_error.is_some() {
        return Ok((query_results, worktree_cleanup));
    }

    if let Some(previous) = results_before_clear {
        if previous.matching_targets != query_results.matching_targets {
            return Err(crate::query::QueryError::InconsistentQueries { what: "MatchingTargets" }.into());
        }
        if *previous.transitive_configured_targets != *query_results.transitive_configured_targets {
            return Err(crate::query::QueryError::InconsistentQueries {
                what: "TransitiveConfiguredTargets",
            }
            .into());
        }
    }

    Ok((query_results, worktree_cleanup))
}
