//! Canonical Bazel target labels
//!
//! A label names a target by repository, package, and target name. Labels are
//! plain values: freely copied, compared by their canonical string rendering,
//! and totally ordered by it. Parsing accepts every absolute form emitted by
//! Bazel query output, including canonical (`@@`) repositories and repository
//! names containing `~` and `+`.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// A fully qualified target label.
///
/// `@//pkg:name` parses identically to `//pkg:name`; two labels that differ
/// only in such inconsequential spelling compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Label {
    repo: String,
    canonical: bool,
    package: String,
    name: String,
}

/// Errors from parsing a label string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("label is empty")]
    Empty,

    #[error("label {0:?} is not absolute (expected a leading `//` or `@`)")]
    NotAbsolute(String),

    #[error("label {0:?} has no target name")]
    MissingTargetName(String),
}

impl Label {
    /// Parse an absolute label.
    ///
    /// Accepted forms: `@repo//pkg:name`, `@@canonical//pkg:name`,
    /// `//pkg:name`, `//pkg` (name defaults to the last package segment),
    /// `//:name`, and `@repo` (shorthand for `@repo//:repo`). Relative labels
    /// are rejected; query output only ever contains absolute ones.
    pub fn parse(s: &str) -> Result<Self, LabelError> {
        if s.is_empty() {
            return Err(LabelError::Empty);
        }

        let (canonical, after_repo_marker) = if let Some(rest) = s.strip_prefix("@@") {
            (true, Some(rest))
        } else if let Some(rest) = s.strip_prefix('@') {
            (false, Some(rest))
        } else {
            (false, None)
        };

        match after_repo_marker {
            None => {
                let rest = s
                    .strip_prefix("//")
                    .ok_or_else(|| LabelError::NotAbsolute(s.to_owned()))?;
                let (package, name) = parse_package_and_name(s, rest)?;
                Ok(Self { repo: String::new(), canonical, package, name })
            }
            Some(rest) => match rest.find("//") {
                // `@repo` names the repository's root target.
                None => {
                    if rest.is_empty() {
                        return Err(LabelError::MissingTargetName(s.to_owned()));
                    }
                    Ok(Self {
                        repo: rest.to_owned(),
                        canonical,
                        package: String::new(),
                        name: rest.to_owned(),
                    })
                }
                Some(idx) => {
                    let (package, name) = parse_package_and_name(s, &rest[idx + 2..])?;
                    Ok(Self { repo: rest[..idx].to_owned(), canonical, package, name })
                }
            },
        }
    }

    /// The repository name, empty for the root repository.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Whether the repository name is canonical (spelled `@@`).
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rewrite the repository component, e.g. when resolving an apparent
    /// repository name to its canonical form.
    pub fn set_repo(&mut self, repo: impl Into<String>, canonical: bool) {
        self.repo = repo.into();
        self.canonical = canonical;
    }
}

fn parse_package_and_name(original: &str, rest: &str) -> Result<(String, String), LabelError> {
    match rest.split_once(':') {
        Some((package, name)) => {
            if name.is_empty() {
                return Err(LabelError::MissingTargetName(original.to_owned()));
            }
            Ok((package.to_owned(), name.to_owned()))
        }
        None => {
            // `//pkg` is shorthand for `//pkg:last-segment`.
            let name = rest.rsplit('/').next().unwrap_or("");
            if name.is_empty() {
                return Err(LabelError::MissingTargetName(original.to_owned()));
            }
            Ok((rest.to_owned(), name.to_owned()))
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.repo.is_empty() || self.canonical {
            write!(f, "{}{}", if self.canonical { "@@" } else { "@" }, self.repo)?;
            if self.package.is_empty() && self.name == self.repo {
                return Ok(());
            }
        }
        write!(f, "//{}", self.package)?;
        let last_segment = self.package.rsplit('/').next().unwrap_or("");
        if !self.package.is_empty() && self.name == last_segment {
            return Ok(());
        }
        write!(f, ":{}", self.name)
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
