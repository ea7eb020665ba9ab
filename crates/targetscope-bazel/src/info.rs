//! `bazel info` and repository-mapping lookups

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use thiserror::Error;

use targetscope_core::version;

use crate::command::{BazelCommand, CommandError};

#[derive(Debug, Error)]
pub enum BazelInfoError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to get the Bazel {key} (status {status}): {stderr}")]
    InfoFailed { key: String, status: i32, stderr: String },

    #[error("failed to get the Bazel repository mapping (status {status}): {stderr}")]
    RepoMappingFailed { status: i32, stderr: String },

    #[error("failed to parse the Bazel repository mapping: {source}")]
    RepoMappingParse {
        #[source]
        source: serde_json::Error,
    },
}

/// Run `bazel info <key>` and return the trimmed value.
pub fn info(bazel: &dyn BazelCommand, workspace: &Path, key: &str) -> Result<String, BazelInfoError> {
    let output = bazel.execute(workspace, &[], "info", &[key.to_owned()])?;
    if !output.success() {
        return Err(BazelInfoError::InfoFailed {
            key: key.to_owned(),
            status: output.status,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout_trimmed())
}

/// The output base directory of the workspace's Bazel server.
pub fn output_base(bazel: &dyn BazelCommand, workspace: &Path) -> Result<String, BazelInfoError> {
    info(bazel, workspace, "output_base")
}

/// The Bazel release string, e.g. `release 7.4.0` or `development version`.
pub fn release(bazel: &dyn BazelCommand, workspace: &Path) -> Result<String, BazelInfoError> {
    info(bazel, workspace, "release")
}

/// Whether bzlmod is enabled for this workspace.
///
/// `starlark-semantics` only mentions `enable_bzlmod` when it was set
/// explicitly; otherwise the release's default applies (on from Bazel 7).
pub fn is_bzlmod_enabled(
    bazel: &dyn BazelCommand,
    workspace: &Path,
    release_string: &str,
) -> Result<bool, BazelInfoError> {
    let semantics = info(bazel, workspace, "starlark-semantics")?;
    if let Some(explicit) = sniff_enable_bzlmod(&semantics) {
        return Ok(explicit);
    }
    let version7 = version::BazelVersion::parse("7.0.0").ok();
    Ok(version::release_is_in_range(release_string, version7.as_ref(), None).unwrap_or(false))
}

fn sniff_enable_bzlmod(semantics: &str) -> Option<bool> {
    let pattern = Regex::new(r"enable_bzlmod=(true|false)").ok()?;
    let captures = pattern.captures(semantics)?;
    Some(&captures[1] == "true")
}

/// Retrieve the main repository mapping via `bazel mod dump_repo_mapping ""`.
pub fn repo_mapping(
    bazel: &dyn BazelCommand,
    workspace: &Path,
) -> Result<HashMap<String, String>, BazelInfoError> {
    let output = bazel.execute(
        workspace,
        &[],
        "mod",
        &["dump_repo_mapping".to_owned(), String::new()],
    )?;
    if !output.success() {
        return Err(BazelInfoError::RepoMappingFailed {
            status: output.status,
            stderr: output.stderr,
        });
    }
    serde_json::from_slice(&output.stdout).map_err(|source| BazelInfoError::RepoMappingParse { source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_explicit_bzlmod_setting() {
        assert_eq!(
            sniff_enable_bzlmod("StarlarkSemantics{enable_bzlmod=true,other=1}"),
            Some(true)
        );
        assert_eq!(
            sniff_enable_bzlmod("StarlarkSemantics{enable_bzlmod=false}"),
            Some(false)
        );
        assert_eq!(sniff_enable_bzlmod("StarlarkSemantics{other=1}"), None);
    }
}
