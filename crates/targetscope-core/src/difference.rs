//! Difference taxonomy for affected targets
//!
//! Categories are stable identifiers consumed by downstream tooling.
//! Do not rename existing categories; add new ones only.

use std::fmt;

use serde::Serialize;

/// The kind of change detected for a target between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DifferenceCategory {
    /// The label matched the pattern only in the after revision.
    NewLabel,

    /// The before revision could not be queried, so the label is assumed new.
    ErrorInQueryBefore,

    /// The label exists on both sides but not in this configuration.
    NewConfiguration,

    /// The (label, configuration) pair is missing from the transitive map.
    NewTarget,

    /// The build tool release differs between the two revisions.
    BazelVersion,

    /// The label exists only in the before revision's graph.
    DeletedTarget,

    /// The label exists only in the after revision's graph.
    AddedTarget,

    /// One side lacks the compared configuration.
    ChangedConfiguration,

    /// The target changed variant, e.g. a source file became a rule.
    TargetTypeChanged,

    /// The rule class changed, e.g. `java_library` to `java_binary`.
    RuleKindChanged,

    /// The digest of the rule's Starlark environment changed.
    RuleImplementationChanged,

    /// The synthetic `$rule_implementation_hash` attribute changed.
    RuleImplementedChanged,

    AttributeAdded,
    AttributeRemoved,
    AttributeChanged,

    RuleInputAdded,
    RuleInputRemoved,
    RuleInputChanged,
}

impl DifferenceCategory {
    /// The category's stable string identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewLabel => "NewLabel",
            Self::ErrorInQueryBefore => "ErrorInQueryBefore",
            Self::NewConfiguration => "NewConfiguration",
            Self::NewTarget => "NewTarget",
            Self::BazelVersion => "BazelVersion",
            Self::DeletedTarget => "DeletedTarget",
            Self::AddedTarget => "AddedTarget",
            Self::ChangedConfiguration => "ChangedConfiguration",
            Self::TargetTypeChanged => "TargetTypeChanged",
            Self::RuleKindChanged => "RuleKindChanged",
            Self::RuleImplementationChanged => "RuleImplementationChanged",
            Self::RuleImplementedChanged => "RuleImplementedChanged",
            Self::AttributeAdded => "AttributeAdded",
            Self::AttributeRemoved => "AttributeRemoved",
            Self::AttributeChanged => "AttributeChanged",
            Self::RuleInputAdded => "RuleInputAdded",
            Self::RuleInputRemoved => "RuleInputRemoved",
            Self::RuleInputChanged => "RuleInputChanged",
        }
    }
}

impl fmt::Display for DifferenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single difference of a target between two revisions.
/// All fields except the category are optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Difference {
    /// The kind of change.
    pub category: DifferenceCategory,

    /// The thing which changed, e.g. an attribute name or an input label.
    pub key: Option<String>,

    /// The value of the key before the change.
    pub before: Option<String>,

    /// The value of the key after the change.
    pub after: Option<String>,
}

impl Difference {
    /// Create a difference carrying only a category.
    pub fn new(category: DifferenceCategory) -> Self {
        Self { category, key: None, before: None, after: None }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_before(mut self, before: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category.as_str())?;
        if let Some(key) = &self.key {
            write!(f, "[{key}]")?;
        }
        if let Some(before) = &self.before {
            write!(f, " Before: {before}")?;
        }
        if let Some(after) = &self.after {
            write!(f, " After: {after}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_strings_are_stable() {
        assert_eq!(DifferenceCategory::NewLabel.as_str(), "NewLabel");
        assert_eq!(DifferenceCategory::RuleInputChanged.as_str(), "RuleInputChanged");
        assert_eq!(DifferenceCategory::ErrorInQueryBefore.as_str(), "ErrorInQueryBefore");
    }

    #[test]
    fn display_formats_fields_in_order() {
        let difference = Difference::new(DifferenceCategory::AttributeChanged)
            .with_key("srcs")
            .with_before("a.java")
            .with_after("b.java");
        assert_eq!(difference.to_string(), "AttributeChanged[srcs] Before: a.java After: b.java");

        let bare = Difference::new(DifferenceCategory::NewTarget);
        assert_eq!(bare.to_string(), "NewTarget");
    }
}
