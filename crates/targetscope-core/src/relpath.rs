//! Relative paths with component-wise prefix semantics
//!
//! Git reports paths relative to the repository root; ignore rules are path
//! prefixes. Prefix tests must be component-wise (`foo` is a prefix of
//! `foo/bar` but not of `foobar`), so paths are stored as component lists
//! rather than strings.

use std::fmt;

/// A relative path, interpreted as if it had no leading or trailing slashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelPath {
    components: Vec<String>,
}

impl RelPath {
    /// Create a new `RelPath` from a string.
    /// Leading slashes on the string are simply ignored, as are repeated and
    /// trailing separators. A `.` component is kept as-is.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            components: path
                .as_ref()
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// The path's components, in order.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether `prefix` is a component-wise prefix of this path.
    /// `foo` is a prefix of `foo/bar` but not of `foobar`.
    pub fn has_prefix(&self, prefix: &RelPath) -> bool {
        self.components.len() >= prefix.components.len()
            && self.components[..prefix.components.len()] == prefix.components[..]
    }

    /// Whether any of `prefixes` is a component-wise prefix of this path.
    pub fn is_ignored(&self, prefixes: &[RelPath]) -> bool {
        prefixes.iter().any(|p| self.has_prefix(p))
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

impl From<&str> for RelPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
