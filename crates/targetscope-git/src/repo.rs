//! Repository operations: status, checkout, worktrees, submodules

use std::fmt;
use std::path::Path;

use targetscope_core::RelPath;

use crate::command::{run_git, run_git_lines, GitError};

/// Resolve a revision spec to a commit sha (or, with `abbrev_ref`, to a
/// symbolic name such as a branch).
pub fn rev_parse(dir: &Path, rev: &str, abbrev_ref: bool) -> Result<String, GitError> {
    let mut args = vec!["rev-parse"];
    if abbrev_ref {
        args.push("--abbrev-ref");
    }
    args.push(rev);
    Ok(run_git(dir, &args)?.trim_end_matches('\n').to_owned())
}

/// One line of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// The shorthand status notation; see `man git-status` for the mapping.
    pub status: String,

    /// Path of the file relative to the repository.
    pub path: RelPath,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3} {}", self.status, self.path)
    }
}

pub(crate) fn parse_status_line(line: &str) -> Option<FileStatus> {
    if line.len() < 4 {
        return None;
    }
    Some(FileStatus {
        status: line[0..3].trim().to_owned(),
        path: RelPath::new(line[3..].trim()),
    })
}

/// Enumerate files which make the working tree unclean.
pub fn status(dir: &Path) -> Result<Vec<FileStatus>, GitError> {
    let lines = run_git_lines(dir, &["status", "--porcelain", "--ignore-submodules=none"])?;
    Ok(lines.iter().filter_map(|line| parse_status_line(line)).collect())
}

/// Like [`status`], with files under any of the ignored prefixes filtered out.
pub fn status_filtered(dir: &Path, ignored: &[RelPath]) -> Result<Vec<FileStatus>, GitError> {
    Ok(status(dir)?
        .into_iter()
        .filter(|file_status| !file_status.path.is_ignored(ignored))
        .collect())
}

/// Check out a commit or ref in place.
pub fn checkout(dir: &Path, rev: &str) -> Result<(), GitError> {
    run_git(dir, &["checkout", rev]).map(|_| ())
}

/// Create a detached worktree at `target` from the repository in `dir`.
/// Force twice: once to allow a missing branch, once to steal a checkout
/// left behind by a previous run.
pub fn create_worktree(dir: &Path, target: &Path, sha: &str) -> Result<(), GitError> {
    let target = target.to_string_lossy();
    run_git(dir, &["worktree", "add", "--force", "--force", "--detach", target.as_ref(), sha])
        .map(|_| ())
}

/// Check out the given commit and clean uncommitted changes and untracked
/// files, including ignored ones. Used when reusing a cached worktree.
pub fn clean_checkout(dir: &Path, sha: &str) -> Result<(), GitError> {
    run_git(dir, &["checkout", "-f", sha])?;
    run_git(dir, &["clean", "-ffdx", sha]).map(|_| ())
}

/// Recursively initialise submodules after a checkout.
pub fn update_submodules(dir: &Path) -> Result<(), GitError> {
    run_git(dir, &["submodule", "update", "--init", "--recursive"]).map(|_| ())
}
