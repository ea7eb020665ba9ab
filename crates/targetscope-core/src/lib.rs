//! Targetscope core
//!
//! Leaf domain types shared by every other crate: canonical Bazel labels,
//! opaque build configurations, relative paths with component-wise prefix
//! semantics, an ordered set container, Bazel release-version gating, and the
//! difference taxonomy reported for affected targets.

pub mod configuration;
pub mod difference;
pub mod label;
pub mod relpath;
pub mod sorted_set;
pub mod version;

pub use configuration::Configuration;
pub use difference::{Difference, DifferenceCategory};
pub use label::{Label, LabelError};
pub use relpath::RelPath;
pub use sorted_set::SortedSet;
pub use version::{BazelVersion, VersionSniffError};
