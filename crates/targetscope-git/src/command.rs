//! git subprocess invocation

use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to launch git {args:?}: {source}")]
    Spawn {
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("git {args:?} failed with status {status}: {stderr}")]
    Failed { args: Vec<String>, status: i32, stderr: String },
}

/// Run git in `dir`, returning captured stdout on success.
pub(crate) fn run_git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let owned_args = || args.iter().map(|a| (*a).to_owned()).collect::<Vec<_>>();
    debug!(?args, dir = %dir.display(), "running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| GitError::Spawn { args: owned_args(), source })?;
    if !output.status.success() {
        return Err(GitError::Failed {
            args: owned_args(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run git and split its stdout into non-empty lines.
pub(crate) fn run_git_lines(dir: &Path, args: &[&str]) -> Result<Vec<String>, GitError> {
    Ok(run_git(dir, args)?
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}
