//! The diff walker
//!
//! Compares the before and after snapshots and, for each differing matching
//! target, derives a structural explanation of why its hash changed. The
//! walker consumes exactly the same rule-input source as the hasher (typed
//! configured rule inputs when available, untyped expansion otherwise), so
//! explanations match what was actually mixed into the digests.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use targetscope_bazel::{diff_configurations, Attribute, ConfiguredTarget};
use targetscope_core::{Configuration, Difference, DifferenceCategory, Label, SortedSet};
use targetscope_git::LabelledGitRev;

use crate::context::Context;
use crate::driver::fully_process;
use crate::query::{QueryResults, TargetsList};
use crate::target_hash::{HashError, LabelAndConfigurations, TargetHashCache};
use crate::EngineError;

/// Called once for each affected target. Differences are only populated when
/// explanations were requested; the configured target is absent when the
/// label is new enough not to appear in the after transitive map.
pub type WalkCallback<'a> = dyn FnMut(&Label, &[Difference], Option<&ConfiguredTarget>) + 'a;

/// Compute which targets may have changed between `rev_before` and the
/// current working-directory state, invoking `callback` for each.
///
/// Explanations can be expensive in time and memory; with
/// `include_differences` false the callback always receives an empty slice.
pub fn walk_affected_targets(
    context: &Context,
    rev_before: &LabelledGitRev,
    targets: &TargetsList,
    include_differences: bool,
    callback: &mut WalkCallback<'_>,
) -> Result<(), EngineError> {
    // The after revision is the working directory as it stands, local
    // changes included. The context's original revision is what we restore,
    // which is not the same thing.
    let rev_after = LabelledGitRev::working_dir("after");

    let (before, after) = fully_process(context, rev_before, &rev_after, targets)?;

    if before.bazel_release == after.bazel_release && before.bazel_release == "development version" {
        warn!(
            "Bazel was detected to be a development version - if the before and after commits \
             used different development versions, differences between them may not be reflected \
             in this output"
        );
    }

    for label in after.matching_targets.labels().iter() {
        diff_single_label(&before, &after, include_differences, label, callback)?;
    }
    Ok(())
}

/// Diff one matching label between the two snapshots, invoking the callback
/// if it is affected.
pub fn diff_single_label(
    before: &QueryResults,
    after: &QueryResults,
    include_differences: bool,
    label: &Label,
    callback: &mut WalkCallback<'_>,
) -> Result<(), EngineError> {
    let after_configurations = after.matching_targets.configurations_for(label);
    let before_configurations = before.matching_targets.configurations_for(label);

    for configuration in after_configurations.iter() {
        let configured_target = after
            .transitive_configured_targets
            .get(label)
            .and_then(|by_configuration| by_configuration.get(configuration));

        let mut differences: Vec<Difference> = Vec::new();

        if before_configurations.is_empty() {
            let category = if before.query_error.is_some() {
                DifferenceCategory::ErrorInQueryBefore
            } else {
                DifferenceCategory::NewLabel
            };
            if include_differences {
                differences.push(Difference::new(category));
            }
            callback(label, &differences, configured_target);
            return Ok(());
        }

        if !before.matching_targets.contains(label, configuration) {
            if include_differences {
                differences.push(new_configuration_difference(
                    before,
                    after,
                    &before_configurations,
                    &after_configurations,
                    configuration,
                ));
            }
            callback(label, &differences, configured_target);
            return Ok(());
        }

        let present_before = before
            .transitive_configured_targets
            .get(label)
            .map_or(false, |by_configuration| by_configuration.contains_key(configuration));
        if !present_before {
            if include_differences {
                differences.push(Difference::new(DifferenceCategory::NewTarget));
            }
            callback(label, &differences, configured_target);
            return Ok(());
        }

        let hash_before = before.target_hash_cache.hash(label, configuration)?;
        let hash_after = after.target_hash_cache.hash(label, configuration)?;
        if hash_before == hash_after {
            continue;
        }
        if include_differences {
            differences =
                walk_diffs(&before.target_hash_cache, &after.target_hash_cache, label, configuration)?;
        }
        callback(label, &differences, configured_target);
    }
    Ok(())
}

/// A `NewConfiguration` record, enriched with a configuration JSON diff when
/// each side has exactly one configuration to compare (the only case in
/// which "which configuration changed into which" is unambiguous).
fn new_configuration_difference(
    before: &QueryResults,
    after: &QueryResults,
    before_configurations: &SortedSet<Configuration>,
    after_configurations: &SortedSet<Configuration>,
    after_configuration: &Configuration,
) -> Difference {
    let mut difference = Difference::new(DifferenceCategory::NewConfiguration);
    if before_configurations.len() != 1 || after_configurations.len() != 1 {
        return difference;
    }
    let Some(before_configuration) = before_configurations.iter().next() else {
        return difference;
    };
    let (Some(dump_before), Some(dump_after)) = (
        before.configurations.get(before_configuration),
        after.configurations.get(after_configuration),
    ) else {
        return difference;
    };
    difference = difference
        .with_before(before_configuration.checksum())
        .with_after(after_configuration.checksum());
    match diff_configurations(dump_before, dump_after) {
        Ok(patch) => difference.with_key(patch),
        Err(err) => {
            warn!("failed to diff configurations: {err}");
            difference
        }
    }
}

/// Accumulate the structural differences of a (label, configuration) between
/// the two hash caches. Mirrors the hash composition: anything mixed into
/// the digest has a corresponding difference category here.
pub fn walk_diffs(
    before: &TargetHashCache,
    after: &TargetHashCache,
    label: &Label,
    configuration: &Configuration,
) -> Result<Vec<Difference>, HashError> {
    let hash_before = before.hash(label, configuration)?;
    let hash_after = after.hash(label, configuration)?;
    if hash_before == hash_after {
        return Ok(Vec::new());
    }

    let mut differences = Vec::new();

    if before.bazel_release() != after.bazel_release() {
        differences.push(
            Difference::new(DifferenceCategory::BazelVersion)
                .with_before(before.bazel_release())
                .with_after(after.bazel_release()),
        );
    }

    let (entry_before, entry_after) = match (before.context().get(label), after.context().get(label)) {
        (Some(before_entry), Some(after_entry)) => (before_entry, after_entry),
        (Some(_), None) => {
            differences.push(Difference::new(DifferenceCategory::DeletedTarget));
            return Ok(differences);
        }
        (None, Some(_)) => {
            differences.push(Difference::new(DifferenceCategory::AddedTarget));
            return Ok(differences);
        }
        (None, None) => return Err(HashError::MissingOnBothSides { label: label.clone() }),
    };

    let (Some(ct_before), Some(ct_after)) =
        (entry_before.get(configuration), entry_after.get(configuration))
    else {
        differences.push(Difference::new(DifferenceCategory::ChangedConfiguration));
        return Ok(differences);
    };

    if ct_before.target.type_name() != ct_after.target.type_name() {
        differences.push(
            Difference::new(DifferenceCategory::TargetTypeChanged)
                .with_before(ct_before.target.type_name())
                .with_after(ct_after.target.type_name()),
        );
        return Ok(differences);
    }

    let (Some(rule_before), Some(rule_after)) = (ct_before.target.as_rule(), ct_after.target.as_rule())
    else {
        return Ok(differences);
    };

    if rule_before.rule_class != rule_after.rule_class {
        differences.push(
            Difference::new(DifferenceCategory::RuleKindChanged)
                .with_before(&rule_before.rule_class)
                .with_after(&rule_after.rule_class),
        );
    }
    if rule_before.skylark_environment_hash_code != rule_after.skylark_environment_hash_code {
        differences.push(
            Difference::new(DifferenceCategory::RuleImplementationChanged)
                .with_before(rule_before.skylark_environment_hash_code.as_deref().unwrap_or(""))
                .with_after(rule_after.skylark_environment_hash_code.as_deref().unwrap_or("")),
        );
    }

    diff_attributes(before, after, rule_before.attribute.as_slice(), rule_after.attribute.as_slice(), &mut differences)?;

    let inputs_before = before.configured_rule_inputs(rule_before, configuration)?;
    let inputs_after = after.configured_rule_inputs(rule_after, configuration)?;
    diff_rule_inputs(before, after, &inputs_before, &inputs_after, &mut differences)?;

    Ok(differences)
}

fn attribute_json(attribute: &Attribute) -> Result<String, HashError> {
    serde_json::to_string(attribute).map_err(|source| HashError::AttributeSerialization {
        name: attribute.name.clone(),
        source,
    })
}

fn diff_attributes(
    before: &TargetHashCache,
    after: &TargetHashCache,
    attributes_before: &[Attribute],
    attributes_after: &[Attribute],
    differences: &mut Vec<Difference>,
) -> Result<(), HashError> {
    let indexed_before: BTreeMap<&str, &Attribute> =
        attributes_before.iter().map(|attribute| (attribute.name.as_str(), attribute)).collect();
    let indexed_after: BTreeMap<&str, &Attribute> =
        attributes_after.iter().map(|attribute| (attribute.name.as_str(), attribute)).collect();

    for (name, attribute_before) in &indexed_before {
        match indexed_after.get(name) {
            None => {
                differences.push(
                    Difference::new(DifferenceCategory::AttributeRemoved)
                        .with_key(*name)
                        .with_before(attribute_json(attribute_before)?),
                );
            }
            Some(attribute_after) => {
                let normalized_before = before.attribute_for_serialization(attribute_before);
                let normalized_after = after.attribute_for_serialization(attribute_after);
                if normalized_before != normalized_after {
                    // The synthetic rule-implementation attribute is opaque;
                    // its values would only be noise.
                    if *name == "$rule_implementation_hash" {
                        differences.push(Difference::new(DifferenceCategory::RuleImplementedChanged));
                    } else {
                        differences.push(
                            Difference::new(DifferenceCategory::AttributeChanged)
                                .with_key(*name)
                                .with_before(attribute_json(&normalized_before)?)
                                .with_after(attribute_json(&normalized_after)?),
                        );
                    }
                }
            }
        }
    }
    for (name, attribute_after) in &indexed_after {
        if !indexed_before.contains_key(name) {
            differences.push(
                Difference::new(DifferenceCategory::AttributeAdded)
                    .with_key(*name)
                    .with_after(attribute_json(&after.attribute_for_serialization(attribute_after))?),
            );
        }
    }
    Ok(())
}

fn index_by_label(inputs: &[LabelAndConfigurations]) -> HashMap<&Label, SortedSet<Configuration>> {
    inputs
        .iter()
        .map(|input| (&input.label, input.configurations.iter().cloned().collect()))
        .collect()
}

fn diff_rule_inputs(
    before: &TargetHashCache,
    after: &TargetHashCache,
    inputs_before: &[LabelAndConfigurations],
    inputs_after: &[LabelAndConfigurations],
    differences: &mut Vec<Difference>,
) -> Result<(), HashError> {
    let configurations_before = index_by_label(inputs_before);
    let configurations_after = index_by_label(inputs_after);

    for input in inputs_after {
        let Some(known_before) = configurations_before.get(&input.label) else {
            differences.push(
                Difference::new(DifferenceCategory::RuleInputAdded).with_key(input.label.to_string()),
            );
            continue;
        };
        let known_after: SortedSet<Configuration> = input.configurations.iter().cloned().collect();

        for after_configuration in known_after.iter() {
            if known_before.contains(after_configuration) {
                let input_hash_before = before.hash(&input.label, after_configuration)?;
                let input_hash_after = after.hash(&input.label, after_configuration)?;
                if input_hash_before != input_hash_after {
                    differences.push(
                        Difference::new(DifferenceCategory::RuleInputChanged)
                            .with_key(format_label_with_configuration(&input.label, after_configuration)),
                    );
                }
            } else {
                differences.push(
                    Difference::new(DifferenceCategory::RuleInputChanged)
                        .with_key(input.label.to_string())
                        .with_after(format!("Configuration: {after_configuration}")),
                );
            }
        }
        for before_configuration in known_before.iter() {
            if !known_after.contains(before_configuration) {
                differences.push(
                    Difference::new(DifferenceCategory::RuleInputChanged)
                        .with_key(input.label.to_string())
                        .with_before(format!("Configuration: {before_configuration}")),
                );
            }
        }
    }

    for input in inputs_before {
        if !configurations_after.contains_key(&input.label) {
            differences.push(
                Difference::new(DifferenceCategory::RuleInputRemoved).with_key(input.label.to_string()),
            );
        }
    }
    Ok(())
}

fn format_label_with_configuration(label: &Label, configuration: &Configuration) -> String {
    if configuration.is_none() {
        label.to_string()
    } else {
        format!("{label}[{configuration}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_with_configuration_formatting() {
        let label = Label::parse("//pkg:target").unwrap();
        assert_eq!(format_label_with_configuration(&label, &Configuration::none()), "//pkg:target");
        assert_eq!(
            format_label_with_configuration(&label, &Configuration::normalize("beef")),
            "//pkg:target[beef]"
        );
    }
}
