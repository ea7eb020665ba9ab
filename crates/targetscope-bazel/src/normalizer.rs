//! Label canonicalisation
//!
//! Bazel may refer to the same repository by an apparent name in one place
//! and a canonical name in another. The normaliser rewrites labels through
//! the repository mapping so two references to the same target always
//! compare (and hash) equal.

use std::collections::HashMap;

use targetscope_core::{Label, LabelError};

use crate::cquery::{Attribute, AttributeKind, ConfiguredTarget, Target};

/// Maps apparent repository names to canonical ones, as reported by
/// `bazel mod dump_repo_mapping ""`. An empty mapping is valid and leaves
/// repository names alone.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    mapping: HashMap<String, String>,
}

impl Normalizer {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self { mapping }
    }

    /// Parse a label and remove sources of inconsequential difference which
    /// would make comparing two labels fail. `@//` is treated the same as
    /// `//`; an apparent repository found in the mapping is rewritten to its
    /// canonical form.
    pub fn parse_canonical_label(&self, s: &str) -> Result<Label, LabelError> {
        let mut label = Label::parse(s)?;
        if !label.is_canonical() && !label.repo().is_empty() {
            if let Some(mapped) = self.mapping.get(label.repo()) {
                if mapped != label.repo() {
                    label.set_repo(mapped.clone(), true);
                }
            }
        }
        Ok(label)
    }

    /// Rewrite every label-valued field of an attribute in place.
    ///
    /// A parse failure leaves the value untouched: attribute strings may be
    /// patterns or placeholders rather than labels. String attributes
    /// flagged `nodep` hold labels too and are treated as such.
    pub fn normalize_attribute(&self, attribute: &mut Attribute) {
        let nodep = attribute.nodep.unwrap_or(false);
        let kind = attribute.kind;

        let single_label = matches!(kind, AttributeKind::Label | AttributeKind::Output)
            || (kind == AttributeKind::String && nodep);
        if single_label {
            if let Some(value) = &attribute.string_value {
                if let Ok(label) = self.parse_canonical_label(value) {
                    attribute.string_value = Some(label.to_string());
                }
            }
        }

        let label_list = matches!(kind, AttributeKind::LabelList | AttributeKind::OutputList)
            || (kind == AttributeKind::StringList && nodep);
        if label_list {
            for value in &mut attribute.string_list_value {
                if let Ok(label) = self.parse_canonical_label(value) {
                    *value = label.to_string();
                }
            }
        }

        if kind == AttributeKind::LabelDictUnary {
            for entry in &mut attribute.label_dict_unary_value {
                if let Ok(label) = self.parse_canonical_label(&entry.value) {
                    entry.value = label.to_string();
                }
            }
        }

        if kind == AttributeKind::LabelListDict {
            for entry in &mut attribute.label_list_dict_value {
                for value in &mut entry.value {
                    if let Ok(label) = self.parse_canonical_label(value) {
                        *value = label.to_string();
                    }
                }
            }
        }

        if kind == AttributeKind::LabelKeyedStringDict {
            for entry in &mut attribute.label_keyed_string_dict_value {
                if let Ok(label) = self.parse_canonical_label(&entry.key) {
                    entry.key = label.to_string();
                }
            }
        }
    }

    /// Normalise every label stored inside a configured target: rule
    /// attributes and configured rule input labels.
    pub fn normalize_configured_target(&self, configured_target: &mut ConfiguredTarget) {
        if let Target::Rule { rule } = &mut configured_target.target {
            for attribute in &mut rule.attribute {
                self.normalize_attribute(attribute);
            }
            for input in &mut rule.configured_rule_input {
                if let Ok(label) = self.parse_canonical_label(&input.label) {
                    input.label = label.to_string();
                }
            }
        }
    }
}
