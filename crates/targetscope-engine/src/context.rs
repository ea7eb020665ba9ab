//! Invocation-scoped configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use targetscope_bazel::BazelCommand;
use targetscope_core::RelPath;
use targetscope_git::LabelledGitRev;

/// How to treat an unclean repository before checking out a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforceClean {
    /// Fail if the repository has non-ignored changes.
    #[default]
    EnforceClean,

    /// Fall back to a cached worktree when non-ignored changes are present.
    AllowIgnored,

    /// Proceed in place as if the tree were clean; local changes may affect
    /// results.
    AllowDirty,
}

/// How to handle a query failure at the "before" revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeforeQueryErrorBehavior {
    /// Treat an error querying as fatal.
    #[default]
    Fatal,

    /// Ignore the error and report every matching "after" target as affected.
    IgnoreAndBuildAll,
}

/// How to clear Bazel's analysis cache before cquery runs.
///
/// `shutdown` stops the server; `discard` runs a `--discard_analysis_cache`
/// build followed by a no-op build to flush deferred cleanup, which avoids a
/// JVM restart but tends to over-invalidate external repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisCacheClearStrategy {
    #[default]
    Skip,
    Shutdown,
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized value {value:?} for {option} (expected one of {expected})")]
pub struct InvalidPolicyValue {
    pub option: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl FromStr for EnforceClean {
    type Err = InvalidPolicyValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enforce-clean" => Ok(Self::EnforceClean),
            "allow-ignored" => Ok(Self::AllowIgnored),
            "allow-dirty" => Ok(Self::AllowDirty),
            other => Err(InvalidPolicyValue {
                option: "enforce-clean",
                value: other.to_owned(),
                expected: "enforce-clean|allow-ignored|allow-dirty",
            }),
        }
    }
}

impl fmt::Display for EnforceClean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EnforceClean => "enforce-clean",
            Self::AllowIgnored => "allow-ignored",
            Self::AllowDirty => "allow-dirty",
        })
    }
}

impl FromStr for BeforeQueryErrorBehavior {
    type Err = InvalidPolicyValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fatal" => Ok(Self::Fatal),
            "ignore-and-build-all" => Ok(Self::IgnoreAndBuildAll),
            other => Err(InvalidPolicyValue {
                option: "before-query-error-behavior",
                value: other.to_owned(),
                expected: "fatal|ignore-and-build-all",
            }),
        }
    }
}

impl fmt::Display for BeforeQueryErrorBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fatal => "fatal",
            Self::IgnoreAndBuildAll => "ignore-and-build-all",
        })
    }
}

impl FromStr for AnalysisCacheClearStrategy {
    type Err = InvalidPolicyValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "shutdown" => Ok(Self::Shutdown),
            "discard" => Ok(Self::Discard),
            other => Err(InvalidPolicyValue {
                option: "analysis-cache-clear-strategy",
                value: other.to_owned(),
                expected: "skip|shutdown|discard",
            }),
        }
    }
}

impl fmt::Display for AnalysisCacheClearStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Shutdown => "shutdown",
            Self::Discard => "discard",
        })
    }
}

/// Everything an invocation needs to know, assembled once by the caller.
pub struct Context {
    /// Absolute path to the Bazel workspace root. Assumed to be inside a git
    /// repository, though not necessarily at its root.
    pub workspace_path: PathBuf,

    /// The revision the repository was in when the context was created;
    /// restored on every exit path.
    pub original_revision: LabelledGitRev,

    /// The build tool.
    pub bazel: Box<dyn BazelCommand>,

    /// The Bazel output base of the original workspace, shared across
    /// worktrees so analysis work is reused.
    pub bazel_output_base: String,

    /// Whether to tear down a created worktree at the end of the invocation
    /// instead of caching it for reuse.
    pub delete_cached_worktree: bool,

    /// Path prefixes whose files never affect the build graph.
    pub ignored_files: Vec<RelPath>,

    pub before_query_error_behavior: BeforeQueryErrorBehavior,

    pub analysis_cache_clear_strategy: AnalysisCacheClearStrategy,

    /// Diagnostic mode: run the deps query before and after clearing the
    /// analysis cache and fail if the results differ.
    pub compare_queries_around_cache_clear: bool,

    /// Whether to drop platform-incompatible targets from the matching set.
    pub filter_incompatible_targets: bool,

    pub enforce_clean: EnforceClean,
}
