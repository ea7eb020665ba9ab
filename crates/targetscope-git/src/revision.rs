//! Revision identities
//!
//! Revisions are resolved to absolute commit shas at construction time, so a
//! later checkout is well-defined even after `HEAD` has moved.

use std::fmt;
use std::path::Path;

use crate::command::GitError;
use crate::repo::rev_parse;

/// A git revision: either the current (possibly dirty) working-directory
/// state, or a resolved commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRev {
    /// The working directory as it stands, not tied to any commit.
    WorkingDir,

    Commit {
        /// The revision spec to use for checkouts; absolute (a sha or a
        /// branch/tag name, never something `HEAD`-relative).
        revision: String,

        /// The sha the revision resolved to.
        sha: String,
    },
}

impl GitRev {
    pub fn sha(&self) -> Option<&str> {
        match self {
            GitRev::WorkingDir => None,
            GitRev::Commit { sha, .. } => Some(sha),
        }
    }

    /// The spec to pass to `git checkout`, when there is one.
    pub fn checkout_ref(&self) -> Option<&str> {
        match self {
            GitRev::WorkingDir => None,
            GitRev::Commit { revision, .. } => Some(revision),
        }
    }
}

impl fmt::Display for GitRev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitRev::WorkingDir => write!(f, "current working directory state"),
            GitRev::Commit { revision, sha } => {
                if revision != sha {
                    write!(f, "{revision}, ")?;
                }
                write!(f, "sha: {sha}")
            }
        }
    }
}

/// A revision together with a human-facing description of its role,
/// e.g. "before" or "after".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledGitRev {
    pub label: String,
    pub rev: GitRev,
}

impl LabelledGitRev {
    /// Resolve a revision spec eagerly. Specs relative to the current state
    /// (such as `HEAD` or `HEAD^`) are replaced by their sha so that checking
    /// out other revisions later cannot change their meaning.
    pub fn resolve(workspace: &Path, revision: &str, label: impl Into<String>) -> Result<Self, GitError> {
        let sha = rev_parse(workspace, revision, false)?;
        let symbolic = rev_parse(workspace, revision, true)?;
        let revision = if symbolic.is_empty() || symbolic == "HEAD" {
            sha.clone()
        } else {
            revision.to_owned()
        };
        Ok(Self { label: label.into(), rev: GitRev::Commit { revision, sha } })
    }

    /// The current working directory, unresolved. Used as the "after"
    /// snapshot of an invocation.
    pub fn working_dir(label: impl Into<String>) -> Self {
        Self { label: label.into(), rev: GitRev::WorkingDir }
    }
}

impl fmt::Display for LabelledGitRev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "revision '{}' ({})", self.label, self.rev)
    }
}
