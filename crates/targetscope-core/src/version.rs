//! Bazel release-version parsing and feature gating
//!
//! Bazel reports its version as `release X.Y.Z` (possibly with a prerelease
//! suffix such as `7.0.0-pre.20230628.2`), or as a free-form string like
//! `development version`. Feature gates compare parsed versions; an
//! unparseable release yields an explanation so callers can pick a
//! conservative default and log it.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

const RELEASE_PREFIX: &str = "release ";

/// Why a release string could not be checked against a version range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionSniffError {
    #[error("Bazel wasn't a released version")]
    NotARelease,

    #[error("failed to parse Bazel version {0:?}")]
    Unparseable(String),
}

/// A parsed Bazel version: dotted numeric release segments plus an optional
/// prerelease suffix.
#[derive(Debug, Clone)]
pub struct BazelVersion {
    release: Vec<u64>,
    prerelease: Vec<Prerelease>,
}

// Missing release segments count as zero (`7.4` equals `7.4.0`), so equality
// has to go through the comparison rather than the derive.
impl PartialEq for BazelVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BazelVersion {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prerelease {
    Number(u64),
    Text(String),
}

impl BazelVersion {
    /// Parse a bare version string such as `7.0.0` or `7.0.0-pre.20230628.2`.
    pub fn parse(s: &str) -> Result<Self, VersionSniffError> {
        let (core, prerelease) = match s.split_once('-') {
            Some((core, pre)) => (core, pre),
            None => (s, ""),
        };
        if core.is_empty() {
            return Err(VersionSniffError::Unparseable(s.to_owned()));
        }
        let release = core
            .split('.')
            .map(|seg| seg.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionSniffError::Unparseable(s.to_owned()))?;
        let prerelease = if prerelease.is_empty() {
            Vec::new()
        } else {
            prerelease
                .split('.')
                .map(|ident| match ident.parse::<u64>() {
                    Ok(n) => Prerelease::Number(n),
                    Err(_) => Prerelease::Text(ident.to_owned()),
                })
                .collect()
        };
        Ok(Self { release, prerelease })
    }

    fn release_segment(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for BazelVersion {
    type Err = VersionSniffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BazelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", core.join("."))?;
        if !self.prerelease.is_empty() {
            let pre: Vec<String> = self
                .prerelease
                .iter()
                .map(|p| match p {
                    Prerelease::Number(n) => n.to_string(),
                    Prerelease::Text(t) => t.clone(),
                })
                .collect();
            write!(f, "-{}", pre.join("."))?;
        }
        Ok(())
    }
}

impl Ord for BazelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let segments = self.release.len().max(other.release.len());
        for i in 0..segments {
            match self.release_segment(i).cmp(&other.release_segment(i)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        // A prerelease sorts before the release it precedes.
        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_prereleases(&self.prerelease, &other.prerelease),
        }
    }
}

impl PartialOrd for BazelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prereleases(left: &[Prerelease], right: &[Prerelease]) -> Ordering {
    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (l, r) {
            (Prerelease::Number(a), Prerelease::Number(b)) => a.cmp(b),
            (Prerelease::Text(a), Prerelease::Text(b)) => a.cmp(b),
            // Numeric identifiers sort before alphanumeric ones.
            (Prerelease::Number(_), Prerelease::Text(_)) => Ordering::Less,
            (Prerelease::Text(_), Prerelease::Number(_)) => Ordering::Greater,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

/// Check whether a `bazel info release` string falls within
/// `[min, max)`. Either bound may be absent.
pub fn release_is_in_range(
    release_string: &str,
    min: Option<&BazelVersion>,
    max: Option<&BazelVersion>,
) -> Result<bool, VersionSniffError> {
    let bare = release_string
        .strip_prefix(RELEASE_PREFIX)
        .ok_or(VersionSniffError::NotARelease)?;
    let version =
        BazelVersion::parse(bare).map_err(|_| VersionSniffError::Unparseable(release_string.to_owned()))?;
    if let Some(min) = min {
        if version < *min {
            return Ok(false);
        }
    }
    if let Some(max) = max {
        if version >= *max {
            return Ok(false);
        }
    }
    Ok(true)
}

fn version(release: &[u64], prerelease: &[&str]) -> BazelVersion {
    BazelVersion {
        release: release.to_vec(),
        prerelease: prerelease
            .iter()
            .map(|ident| match ident.parse::<u64>() {
                Ok(n) => Prerelease::Number(n),
                Err(_) => Prerelease::Text((*ident).to_owned()),
            })
            .collect(),
    }
}

fn configured_rule_inputs_cutoff() -> BazelVersion {
    version(&[7, 0, 0], &["pre", "20230628", "2"])
}

/// Whether cquery reports typed configured rule inputs (Bazel ≥ 7).
/// Unknown versions are assumed not to, which over-estimates affected
/// targets rather than missing any.
pub fn supports_configured_rule_inputs(release_string: &str) -> bool {
    match release_is_in_range(release_string, Some(&configured_rule_inputs_cutoff()), None) {
        Ok(supported) => supported,
        Err(explanation) => {
            warn!(
                "{explanation} - assuming cquery does not support configured rule inputs \
                 (supported from bazel 7), which may lead to over-estimates of affected targets"
            );
            false
        }
    }
}

/// Whether `cquery` accepts `--output_file` (Bazel ≥ 8.2.0).
pub fn supports_cquery_output_file(release_string: &str) -> bool {
    release_is_in_range(release_string, Some(&version(&[8, 2, 0], &[])), None).unwrap_or(false)
}

/// Whether `bazel mod dump_repo_mapping` exists (Bazel ≥ 8.0.0).
pub fn supports_mod_dump_repo_mapping(release_string: &str) -> bool {
    release_is_in_range(release_string, Some(&version(&[8, 0, 0], &[])), None).unwrap_or(false)
}

/// Whether this release mis-reports platform-incompatible targets from
/// target patterns, requiring the side-query workaround.
/// Undecidable releases return the explanation so the caller can log it.
pub fn has_incompatible_targets_bug(release_string: &str) -> Result<bool, VersionSniffError> {
    release_is_in_range(
        release_string,
        Some(&configured_rule_inputs_cutoff()),
        Some(&version(&[7, 4, 0], &[])),
    )
}
