//! Engine tests over fabricated cquery results and on-disk fixtures.
//!
//! The fixture graph mirrors a small Java project:
//!
//! ```text
//!   //:bin -> //:lib -> Greeting.java
//!      |
//!      v
//!   HelloWorld.java
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use targetscope_bazel::{
    Attribute, AttributeKind, ConfigurationSummary, ConfiguredRuleInput, ConfiguredTarget,
    CqueryResult, GeneratedFile, Normalizer, Rule, SourceFile, Target,
};
use targetscope_core::{Configuration, Difference, DifferenceCategory, Label, SortedSet};
use targetscope_engine::{
    diff_single_label, query::index_cquery_result, walk_diffs, MatchingTargets, QueryResults,
    TargetHashCache,
};

const CONFIG: &str = "eed618a573b916b7c6c94b04a4aef1da8c0ebce4c6312065c8b0360fedd8deb9";
const RELEASE: &str = "release 5.1.1";

fn label(s: &str) -> Label {
    Label::parse(s).unwrap()
}

fn config() -> Configuration {
    Configuration::normalize(CONFIG)
}

fn rule_target(name: &str, rule_class: &str, rule_input: &[&str]) -> ConfiguredTarget {
    ConfiguredTarget {
        target: Target::Rule {
            rule: Rule {
                name: name.to_owned(),
                rule_class: rule_class.to_owned(),
                rule_input: rule_input.iter().map(|s| (*s).to_owned()).collect(),
                ..Rule::default()
            },
        },
        configuration: Some(ConfigurationSummary { checksum: CONFIG.to_owned() }),
    }
}

fn source_target(dir: &Path, name: &str, file: &str) -> ConfiguredTarget {
    ConfiguredTarget {
        target: Target::SourceFile {
            source_file: SourceFile {
                name: name.to_owned(),
                location: Some(format!("{}/{file}:1:1", dir.display())),
                visibility_label: Vec::new(),
            },
        },
        configuration: None,
    }
}

/// Write the fixture sources into `dir`.
fn layout_project(dir: &Path) {
    fs::write(dir.join("HelloWorld.java"), "public class HelloWorld {}\n").unwrap();
    fs::write(dir.join("Greeting.java"), "public class Greeting {}\n").unwrap();
}

fn project_targets(dir: &Path) -> Vec<ConfiguredTarget> {
    vec![
        rule_target("//:bin", "java_binary", &["//:lib", "//:HelloWorld.java"]),
        rule_target("//:lib", "java_library", &["//:Greeting.java"]),
        source_target(dir, "//:HelloWorld.java", "HelloWorld.java"),
        source_target(dir, "//:Greeting.java", "Greeting.java"),
        source_target(dir, "//:ThereIsNoWorld.java", "ThereIsNoWorld.java"),
    ]
}

fn cache_for(results: Vec<ConfiguredTarget>, release: &str) -> TargetHashCache {
    let normalizer = Arc::new(Normalizer::default());
    let context = Arc::new(index_cquery_result(CqueryResult { results }, &normalizer).unwrap());
    TargetHashCache::new(context, normalizer, release)
}

fn snapshot(results: Vec<ConfiguredTarget>, release: &str, matching: &[&str]) -> QueryResults {
    let normalizer = Arc::new(Normalizer::default());
    let context = Arc::new(index_cquery_result(CqueryResult { results }, &normalizer).unwrap());
    let mut labels_to_configurations: HashMap<Label, SortedSet<Configuration>> = HashMap::new();
    for matching_label in matching {
        labels_to_configurations.entry(label(matching_label)).or_default().add(config());
    }
    QueryResults {
        matching_targets: MatchingTargets::new(labels_to_configurations),
        transitive_configured_targets: Arc::clone(&context),
        target_hash_cache: TargetHashCache::new(Arc::clone(&context), normalizer, release),
        bazel_release: release.to_owned(),
        query_error: None,
        configurations: HashMap::new(),
    }
}

/// Run the walker over every after-side matching label, collecting
/// (label, differences) for each affected target.
fn collect_affected(before: &QueryResults, after: &QueryResults) -> Vec<(String, Vec<Difference>)> {
    let mut affected = Vec::new();
    for matching_label in after.matching_targets.labels().iter() {
        diff_single_label(before, after, true, matching_label, &mut |l, differences, _| {
            affected.push((l.to_string(), differences.to_vec()));
        })
        .unwrap();
    }
    affected
}

fn categories(differences: &[Difference]) -> Vec<DifferenceCategory> {
    differences.iter().map(|d| d.category).collect()
}

#[test]
fn digests_single_source_file() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let cache = cache_for(project_targets(dir.path()), RELEASE);

    let digest = cache.hash(&label("//:HelloWorld.java"), &Configuration::none()).unwrap();

    let mut hasher = Sha256::new();
    hasher.update(b"0");
    hasher.update("public class HelloWorld {}\n".as_bytes());
    assert_eq!(digest, hasher.finalize().to_vec());
}

#[test]
fn digesting_missing_source_file_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let cache = cache_for(project_targets(dir.path()), RELEASE);

    let digest = cache.hash(&label("//:ThereIsNoWorld.java"), &Configuration::none()).unwrap();
    assert!(digest.is_empty());
}

#[test]
fn digesting_directory_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    fs::create_dir(dir.path().join("InhabitedPlanets")).unwrap();

    let mut results = project_targets(dir.path());
    results.push(source_target(dir.path(), "//:InhabitedPlanets", "InhabitedPlanets"));
    let cache = cache_for(results, RELEASE);

    let digest = cache.hash(&label("//:InhabitedPlanets"), &Configuration::none()).unwrap();
    assert!(digest.is_empty());
}

#[test]
fn rules_referencing_missing_files_hash_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let mut results = project_targets(dir.path());
    results.push(rule_target("//:ghost", "java_library", &["//:ThereIsNoWorld.java"]));
    let cache = cache_for(results, RELEASE);

    assert!(cache.hash(&label("//:ghost"), &config()).is_ok());
}

#[test]
fn rule_inputs_missing_from_context_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let mut results = project_targets(dir.path());
    results.push(rule_target("//:partial", "java_library", &["//:HelloWorld.java", "//:not-in-context"]));
    let cache = cache_for(results, RELEASE);

    assert!(cache.hash(&label("//:partial"), &config()).is_ok());
}

#[test]
fn recomputation_on_a_fresh_cache_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let first = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    let second = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn digest_is_independent_of_checkout_directory() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    layout_project(dir_a.path());
    layout_project(dir_b.path());

    let hash_a = cache_for(project_targets(dir_a.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    let hash_b = cache_for(project_targets(dir_b.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    assert_eq!(hash_a, hash_b);
}

#[test]
fn bazel_release_is_mixed_into_rule_digests() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let original = cache_for(project_targets(dir.path()), "release 5.1.1")
        .hash(&label("//:bin"), &config())
        .unwrap();
    let other_release = cache_for(project_targets(dir.path()), "release 5.1.0")
        .hash(&label("//:bin"), &config())
        .unwrap();
    assert_ne!(original, other_release);
}

#[test]
fn direct_and_transitive_file_changes_alter_the_digest() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let original = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();

    fs::write(dir.path().join("HelloWorld.java"), "not valid java!").unwrap();
    let direct_change = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    assert_ne!(original, direct_change);

    layout_project(dir.path());
    fs::write(dir.path().join("Greeting.java"), "also not valid java!").unwrap();
    let transitive_change = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    assert_ne!(original, transitive_change);
    assert_ne!(direct_change, transitive_change);
}

#[test]
fn removed_dependency_stops_propagation() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let mut without_lib = project_targets(dir.path());
    without_lib[0] = rule_target("//:bin", "java_binary", &["//:HelloWorld.java"]);
    let removed_dep = cache_for(without_lib.clone(), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();

    // With the dep gone, a change to its source must not reach //:bin.
    fs::write(dir.path().join("Greeting.java"), "also not valid java!").unwrap();
    let after_change = cache_for(without_lib, RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    assert_eq!(removed_dep, after_change);
}

#[cfg(unix)]
#[test]
fn owner_execute_bit_flip_changes_digests() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    fs::set_permissions(dir.path().join("HelloWorld.java"), fs::Permissions::from_mode(0o644)).unwrap();
    let plain_bin = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    let plain_source = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:HelloWorld.java"), &Configuration::none())
        .unwrap();

    fs::set_permissions(dir.path().join("HelloWorld.java"), fs::Permissions::from_mode(0o755)).unwrap();
    let flipped_bin = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    let flipped_source = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:HelloWorld.java"), &Configuration::none())
        .unwrap();

    assert_ne!(plain_source, flipped_source);
    assert_ne!(plain_bin, flipped_bin);
}

#[test]
fn redacted_attribute_detail_does_not_affect_digests() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let with_attributes = |explicitly_specified: Option<bool>, generator_location: &str| {
        let mut results = project_targets(dir.path());
        let mut srcs = Attribute::new("srcs", AttributeKind::LabelList);
        srcs.string_list_value = vec!["//:HelloWorld.java".to_owned()];
        srcs.explicitly_specified = explicitly_specified;
        let mut location = Attribute::new("generator_location", AttributeKind::String);
        location.string_value = Some(generator_location.to_owned());
        if let Target::Rule { rule } = &mut results[0].target {
            rule.attribute = vec![srcs, location];
        }
        results
    };

    let baseline = cache_for(with_attributes(None, "/home/alice/ws/BUILD:1:1"), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    let redacted_variant = cache_for(with_attributes(Some(true), "/home/bob/elsewhere/BUILD:9:9"), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    assert_eq!(baseline, redacted_variant);

    // A substantive attribute change does alter the digest.
    let mut results = with_attributes(None, "/home/alice/ws/BUILD:1:1");
    if let Target::Rule { rule } = &mut results[0].target {
        rule.attribute[0].string_list_value = vec!["//:Greeting.java".to_owned()];
    }
    let changed = cache_for(results, RELEASE).hash(&label("//:bin"), &config()).unwrap();
    assert_ne!(baseline, changed);
}

#[test]
fn adding_an_unused_rule_input_changes_only_that_rule() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let baseline_bin = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:bin"), &config())
        .unwrap();
    let baseline_lib = cache_for(project_targets(dir.path()), RELEASE)
        .hash(&label("//:lib"), &config())
        .unwrap();

    let mut results = project_targets(dir.path());
    results[0] = rule_target("//:bin", "java_binary", &["//:lib", "//:HelloWorld.java", "//:Greeting.java"]);
    let cache = cache_for(results, RELEASE);
    assert_ne!(cache.hash(&label("//:bin"), &config()).unwrap(), baseline_bin);
    assert_eq!(cache.hash(&label("//:lib"), &config()).unwrap(), baseline_lib);
}

#[test]
fn generated_files_mix_in_their_generating_rule() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let generated = |generating_rule: &str| ConfiguredTarget {
        target: Target::GeneratedFile {
            generated_file: GeneratedFile {
                name: "//:out.txt".to_owned(),
                generating_rule: generating_rule.to_owned(),
                location: None,
            },
        },
        configuration: Some(ConfigurationSummary { checksum: CONFIG.to_owned() }),
    };

    let mut results = project_targets(dir.path());
    results.push(generated("//:bin"));
    let from_bin = cache_for(results, RELEASE).hash(&label("//:out.txt"), &config()).unwrap();

    let mut results = project_targets(dir.path());
    results.push(generated("//:lib"));
    let from_lib = cache_for(results, RELEASE).hash(&label("//:out.txt"), &config()).unwrap();

    assert_ne!(from_bin, from_lib);
}

#[test]
fn known_configurations_reflect_the_context() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let cache = cache_for(project_targets(dir.path()), RELEASE);

    let rule_configurations = cache.known_configurations(&label("//:bin"));
    assert_eq!(rule_configurations.to_vec(), vec![config()]);

    let source_configurations = cache.known_configurations(&label("//:Greeting.java"));
    assert_eq!(source_configurations.to_vec(), vec![Configuration::none()]);

    assert!(cache.known_configurations(&label("//:absent")).is_empty());
}

#[test]
fn frozen_cache_serves_computed_entries_and_rejects_fresh_ones() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let cache = cache_for(project_targets(dir.path()), RELEASE);

    let before_freeze = cache.hash(&label("//:bin"), &config()).unwrap();
    cache.freeze();

    assert_eq!(cache.hash(&label("//:bin"), &config()).unwrap(), before_freeze);
    // //:lib was hashed transitively while computing //:bin.
    assert!(cache.hash(&label("//:lib"), &config()).is_ok());

    // Mutating the tree must not be observable through the frozen cache.
    fs::write(dir.path().join("HelloWorld.java"), "changed underneath").unwrap();
    assert_eq!(cache.hash(&label("//:bin"), &config()).unwrap(), before_freeze);

    let err = cache.hash(&label("//:never-hashed"), &config()).unwrap_err();
    assert!(matches!(err, targetscope_engine::HashError::NotComputedBeforeFrozen { .. }));
}

#[test]
fn prefill_hashes_matching_targets_and_freezes() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    let results = snapshot(project_targets(dir.path()), RELEASE, &["//:bin", "//:lib"]);

    results.prefill_cache().unwrap();
    assert!(results.target_hash_cache.is_frozen());
    assert!(results.target_hash_cache.hash(&label("//:bin"), &config()).is_ok());
    assert!(results.target_hash_cache.hash(&label("//:Greeting.java"), &Configuration::none()).is_ok());
}

#[test]
fn typed_configured_rule_inputs_resolve_empty_configurations() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());
    // Bazel 7.4.0 reports typed configured rule inputs.
    let release = "release 7.4.0";

    let typed_rule = |name: &str, inputs: Vec<ConfiguredRuleInput>| ConfiguredTarget {
        target: Target::Rule {
            rule: Rule {
                name: name.to_owned(),
                rule_class: "java_binary".to_owned(),
                configured_rule_input: inputs,
                ..Rule::default()
            },
        },
        configuration: Some(ConfigurationSummary { checksum: CONFIG.to_owned() }),
    };

    let results = vec![
        // An empty input configuration means "source file" or "no
        // transition"; both must resolve against the context.
        typed_rule(
            "//:bin",
            vec![
                ConfiguredRuleInput { label: "//:lib".to_owned(), configuration_checksum: None },
                ConfiguredRuleInput {
                    label: "//:HelloWorld.java".to_owned(),
                    configuration_checksum: None,
                },
            ],
        ),
        typed_rule("//:lib", Vec::new()),
        source_target(dir.path(), "//:HelloWorld.java", "HelloWorld.java"),
    ];
    let cache = cache_for(results, release);

    let digest = cache.hash(&label("//:bin"), &config()).unwrap();
    assert!(!digest.is_empty());

    let rule = cache
        .context()
        .get(&label("//:bin"))
        .and_then(|m| m.get(&config()))
        .and_then(|ct| ct.target.as_rule())
        .unwrap()
        .clone();
    let inputs = cache.configured_rule_inputs(&rule, &config()).unwrap();
    assert_eq!(inputs.len(), 2);
    // //:lib exists under the depending rule's configuration.
    assert_eq!(inputs[0].configurations, vec![config()]);
    // //:HelloWorld.java only exists unconfigured.
    assert_eq!(inputs[1].configurations, vec![Configuration::none()]);
}

#[test]
fn aliases_expand_to_a_single_configuration() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let mut results = project_targets(dir.path());
    results.push(rule_target("//:source_alias", "alias", &["//:HelloWorld.java"]));
    results.push(rule_target("//:rule_alias", "alias", &["//:lib"]));
    let cache = cache_for(results, RELEASE);

    let alias_rule = |name: &str| {
        cache
            .context()
            .get(&label(name))
            .and_then(|m| m.get(&config()))
            .and_then(|ct| ct.target.as_rule())
            .unwrap()
            .clone()
    };

    let source_inputs = cache.configured_rule_inputs(&alias_rule("//:source_alias"), &config()).unwrap();
    assert_eq!(source_inputs[0].configurations, vec![Configuration::none()]);

    let rule_inputs = cache.configured_rule_inputs(&alias_rule("//:rule_alias"), &config()).unwrap();
    assert_eq!(rule_inputs[0].configurations, vec![config()]);
}

// Scenario: only HelloWorld.java changes. //:bin is affected through its
// direct source input; //:lib is untouched.
#[test]
fn source_only_change_reports_the_consuming_rule() {
    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());
    fs::write(after_dir.path().join("HelloWorld.java"), "public class HelloWorld { int x; }\n").unwrap();

    let before = snapshot(project_targets(before_dir.path()), RELEASE, &["//:bin", "//:lib"]);
    let after = snapshot(project_targets(after_dir.path()), RELEASE, &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    assert_eq!(affected.len(), 1);
    let (affected_label, differences) = &affected[0];
    assert_eq!(affected_label, "//:bin");
    assert_eq!(categories(differences), vec![DifferenceCategory::RuleInputChanged]);
    assert_eq!(differences[0].key.as_deref(), Some("//:HelloWorld.java"));
}

// Scenario: Greeting.java changes. //:lib is affected directly and //:bin
// through //:lib.
#[test]
fn transitive_change_reports_both_rules() {
    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());
    fs::write(after_dir.path().join("Greeting.java"), "public class Greeting { int x; }\n").unwrap();

    let before = snapshot(project_targets(before_dir.path()), RELEASE, &["//:bin", "//:lib"]);
    let after = snapshot(project_targets(after_dir.path()), RELEASE, &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    let by_label: HashMap<&str, &Vec<Difference>> =
        affected.iter().map(|(l, d)| (l.as_str(), d)).collect();
    assert_eq!(by_label.len(), 2);

    let bin = by_label["//:bin"];
    assert_eq!(categories(bin), vec![DifferenceCategory::RuleInputChanged]);
    assert_eq!(bin[0].key.as_deref(), Some(format!("//:lib[{CONFIG}]").as_str()));

    let lib = by_label["//:lib"];
    assert_eq!(categories(lib), vec![DifferenceCategory::RuleInputChanged]);
    assert_eq!(lib[0].key.as_deref(), Some("//:Greeting.java"));
}

// Scenario: //:bin drops its dep on //:lib while Greeting.java also changes.
// The removal is reported, and the Greeting change no longer reaches //:bin.
#[test]
fn removed_dependency_is_reported_without_propagation() {
    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());
    fs::write(after_dir.path().join("Greeting.java"), "public class Greeting { int x; }\n").unwrap();

    let mut after_targets = project_targets(after_dir.path());
    after_targets[0] = rule_target("//:bin", "java_binary", &["//:HelloWorld.java"]);

    let before = snapshot(project_targets(before_dir.path()), RELEASE, &["//:bin", "//:lib"]);
    let after = snapshot(after_targets, RELEASE, &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    let by_label: HashMap<&str, &Vec<Difference>> =
        affected.iter().map(|(l, d)| (l.as_str(), d)).collect();

    let bin = by_label["//:bin"];
    assert_eq!(categories(bin), vec![DifferenceCategory::RuleInputRemoved]);
    assert_eq!(bin[0].key.as_deref(), Some("//:lib"));

    // //:lib itself still changed.
    assert!(by_label.contains_key("//:lib"));
}

// Scenario: only the owner-execute bit of HelloWorld.java flips.
#[cfg(unix)]
#[test]
fn file_mode_flip_reports_the_consuming_rule() {
    use std::os::unix::fs::PermissionsExt;

    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());
    fs::set_permissions(before_dir.path().join("HelloWorld.java"), fs::Permissions::from_mode(0o644))
        .unwrap();
    fs::set_permissions(after_dir.path().join("HelloWorld.java"), fs::Permissions::from_mode(0o755))
        .unwrap();

    let before = snapshot(project_targets(before_dir.path()), RELEASE, &["//:bin", "//:lib"]);
    let after = snapshot(project_targets(after_dir.path()), RELEASE, &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].0, "//:bin");
}

// Scenario: identical trees, different Bazel releases. Every rule target is
// affected, and the explanation leads with the version change.
#[test]
fn bazel_version_bump_reports_every_rule() {
    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());

    let before = snapshot(project_targets(before_dir.path()), "release 5.1.1", &["//:bin", "//:lib"]);
    let after = snapshot(project_targets(after_dir.path()), "release 5.1.0", &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    let by_label: HashMap<&str, &Vec<Difference>> =
        affected.iter().map(|(l, d)| (l.as_str(), d)).collect();
    assert_eq!(by_label.len(), 2);

    for affected_label in ["//:bin", "//:lib"] {
        let differences = by_label[affected_label];
        assert_eq!(
            differences[0].category,
            DifferenceCategory::BazelVersion,
            "{affected_label} should lead with the version change"
        );
        assert_eq!(differences[0].before.as_deref(), Some("release 5.1.1"));
        assert_eq!(differences[0].after.as_deref(), Some("release 5.1.0"));
    }
}

#[test]
fn new_labels_are_reported_as_new() {
    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());

    let before = snapshot(project_targets(before_dir.path()), RELEASE, &["//:lib"]);
    let after = snapshot(project_targets(after_dir.path()), RELEASE, &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].0, "//:bin");
    assert_eq!(categories(&affected[0].1), vec![DifferenceCategory::NewLabel]);
}

#[test]
fn before_query_errors_mark_every_target() {
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(after_dir.path());

    let mut before = snapshot(Vec::new(), RELEASE, &[]);
    before.query_error = Some("failed to run cquery on deps(//...)".to_owned());
    let after = snapshot(project_targets(after_dir.path()), RELEASE, &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    assert_eq!(affected.len(), 2);
    for (_, differences) in &affected {
        assert_eq!(categories(differences), vec![DifferenceCategory::ErrorInQueryBefore]);
    }
}

#[test]
fn configuration_change_is_reported_and_explained() {
    use serde_json::json;
    use targetscope_bazel::ConfigurationDump;

    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());

    let other_config = "1111111111111111111111111111111111111111111111111111111111111111";
    let retargeted = |name: &str, inputs: &[&str], checksum: &str| {
        let mut target = rule_target(name, "java_binary", inputs);
        target.configuration = Some(ConfigurationSummary { checksum: checksum.to_owned() });
        target
    };

    let mut before = snapshot(
        vec![
            retargeted("//:bin", &["//:HelloWorld.java"], CONFIG),
            source_target(before_dir.path(), "//:HelloWorld.java", "HelloWorld.java"),
        ],
        RELEASE,
        &["//:bin"],
    );
    before.configurations.insert(
        config(),
        ConfigurationDump {
            config_hash: CONFIG.to_owned(),
            fragments: json!({"JavaOptions": {"opt": "-O1"}}),
            fragment_options: serde_json::Value::Null,
        },
    );

    let mut after_matching: HashMap<Label, SortedSet<Configuration>> = HashMap::new();
    after_matching
        .entry(label("//:bin"))
        .or_default()
        .add(Configuration::normalize(other_config));
    let normalizer = Arc::new(Normalizer::default());
    let after_context = Arc::new(
        index_cquery_result(
            CqueryResult {
                results: vec![
                    retargeted("//:bin", &["//:HelloWorld.java"], other_config),
                    source_target(after_dir.path(), "//:HelloWorld.java", "HelloWorld.java"),
                ],
            },
            &normalizer,
        )
        .unwrap(),
    );
    let mut after = QueryResults {
        matching_targets: MatchingTargets::new(after_matching),
        transitive_configured_targets: Arc::clone(&after_context),
        target_hash_cache: TargetHashCache::new(after_context, normalizer, RELEASE),
        bazel_release: RELEASE.to_owned(),
        query_error: None,
        configurations: HashMap::new(),
    };
    after.configurations.insert(
        Configuration::normalize(other_config),
        ConfigurationDump {
            config_hash: other_config.to_owned(),
            fragments: json!({"JavaOptions": {"opt": "-O2"}}),
            fragment_options: serde_json::Value::Null,
        },
    );

    let affected = collect_affected(&before, &after);
    assert_eq!(affected.len(), 1);
    let differences = &affected[0].1;
    assert_eq!(categories(differences), vec![DifferenceCategory::NewConfiguration]);
    assert_eq!(differences[0].before.as_deref(), Some(CONFIG));
    assert_eq!(differences[0].after.as_deref(), Some(other_config));
    let patch = differences[0].key.as_deref().unwrap();
    assert!(patch.contains("/Fragments/JavaOptions/opt"), "patch was {patch}");
}

#[test]
fn target_missing_from_transitive_map_is_new() {
    let before_dir = tempfile::tempdir().unwrap();
    let after_dir = tempfile::tempdir().unwrap();
    layout_project(before_dir.path());
    layout_project(after_dir.path());

    // The before matching set claims //:bin, but its transitive map lost it.
    let mut before = snapshot(
        project_targets(before_dir.path())
            .into_iter()
            .filter(|ct| ct.target.name() != "//:bin")
            .collect(),
        RELEASE,
        &[],
    );
    let mut claimed: HashMap<Label, SortedSet<Configuration>> = HashMap::new();
    claimed.entry(label("//:bin")).or_default().add(config());
    claimed.entry(label("//:lib")).or_default().add(config());
    before.matching_targets = MatchingTargets::new(claimed);

    let after = snapshot(project_targets(after_dir.path()), RELEASE, &["//:bin", "//:lib"]);

    let affected = collect_affected(&before, &after);
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].0, "//:bin");
    assert_eq!(categories(&affected[0].1), vec![DifferenceCategory::NewTarget]);
}

#[test]
fn walk_diffs_explains_attribute_and_kind_changes() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let with_rule = |rule_class: &str, attribute: Option<Attribute>| {
        let mut results = project_targets(dir.path());
        let mut rule = Rule {
            name: "//:bin".to_owned(),
            rule_class: rule_class.to_owned(),
            rule_input: vec!["//:lib".to_owned(), "//:HelloWorld.java".to_owned()],
            ..Rule::default()
        };
        rule.attribute = attribute.into_iter().collect();
        results[0] = ConfiguredTarget {
            target: Target::Rule { rule },
            configuration: Some(ConfigurationSummary { checksum: CONFIG.to_owned() }),
        };
        results
    };

    let mut tags = Attribute::new("tags", AttributeKind::StringList);
    tags.string_list_value = vec!["manual".to_owned()];

    let before_cache = cache_for(with_rule("java_binary", None), RELEASE);
    let after_cache = cache_for(with_rule("java_test", Some(tags)), RELEASE);

    let differences =
        walk_diffs(&before_cache, &after_cache, &label("//:bin"), &config()).unwrap();
    let found = categories(&differences);
    assert_eq!(
        found,
        vec![DifferenceCategory::RuleKindChanged, DifferenceCategory::AttributeAdded]
    );
    assert_eq!(differences[0].before.as_deref(), Some("java_binary"));
    assert_eq!(differences[0].after.as_deref(), Some("java_test"));
    assert_eq!(differences[1].key.as_deref(), Some("tags"));
}

#[test]
fn walk_diffs_returns_nothing_for_identical_targets() {
    let dir = tempfile::tempdir().unwrap();
    layout_project(dir.path());

    let before_cache = cache_for(project_targets(dir.path()), RELEASE);
    let after_cache = cache_for(project_targets(dir.path()), RELEASE);

    let differences =
        walk_diffs(&before_cache, &after_cache, &label("//:bin"), &config()).unwrap();
    assert!(differences.is_empty());
}
