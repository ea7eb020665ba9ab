//! The target hash cache
//!
//! Maps (label, configuration) to a digest that changes when anything
//! transitively affecting the target's build output changes. Digests are
//! memoised so each configured target is hashed at most once, which makes the
//! dynamic programming tractable on graphs with millions of edges.
//!
//! The cache reads files lazily. Before the filesystem mutates (a revision
//! checkout), callers must [`freeze`](TargetHashCache::freeze) the cache:
//! from then on it is a pure lookup and any request for an uncomputed entry
//! fails rather than reading stale state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use targetscope_bazel::{Attribute, ConfiguredTarget, Normalizer, Rule, Target};
use targetscope_core::{version, Configuration, Label, LabelError, SortedSet};

use crate::file_hash::FileHashCache;

/// The arena of configured targets a revision's query produced, indexed by
/// (label, configuration). Edges between targets are those key pairs, never
/// owning pointers.
pub type TargetContext = HashMap<Label, HashMap<Configuration, ConfiguredTarget>>;

/// A rule-input label together with the configurations it is depended on in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAndConfigurations {
    pub label: Label,
    pub configurations: Vec<Configuration>,
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error("label {label} not found in context")]
    LabelNotFound { label: Label },

    #[error("label {label} in configuration {configuration} not found in context")]
    ConfigurationNotFound { label: Label, configuration: Configuration },

    #[error("no hash was computed for {label} in configuration {configuration} before the cache was frozen")]
    NotComputedBeforeFrozen { label: Label, configuration: Configuration },

    #[error("failed to hash file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse label {text:?}: {source}")]
    Label {
        text: String,
        #[source]
        source: LabelError,
    },

    #[error("failed to serialise attribute {name}: {source}")]
    AttributeSerialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "configured rule inputs for {rule} included {input} in configuration {input_configuration:?} \
         but it couldn't be found either unconfigured or in the depending target's configuration \
         {own_configuration:?}; this probably indicates a bug in the build tool"
    )]
    MissingConfiguredRuleInput {
        rule: String,
        input: Label,
        input_configuration: Configuration,
        own_configuration: Configuration,
    },

    #[error("didn't know how to hash target {label} with type {type_name}")]
    UnsupportedTargetType { label: Label, type_name: &'static str },

    #[error("target {label} didn't exist in either revision")]
    MissingOnBothSides { label: Label },
}

impl HashError {
    /// Whether this is a tolerable context miss. Build-tool bugs can list
    /// rule inputs that a transitive deps query never returned; legacy
    /// rule-input expansion skips those instead of failing.
    pub fn is_label_not_found(&self) -> bool {
        matches!(self, Self::LabelNotFound { .. } | Self::ConfigurationNotFound { .. })
    }
}

#[derive(Debug, Default)]
struct HashEntry {
    digest: Mutex<Option<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct CacheState {
    frozen: bool,
    entries: HashMap<Label, HashMap<Configuration, Arc<HashEntry>>>,
}

/// Memoised digests over a revision's configured-target graph.
pub struct TargetHashCache {
    context: Arc<TargetContext>,
    file_hashes: FileHashCache,
    normalizer: Arc<Normalizer>,
    bazel_release: String,
    configured_rule_inputs_supported: bool,
    state: Mutex<CacheState>,
}

impl TargetHashCache {
    pub fn new(
        context: Arc<TargetContext>,
        normalizer: Arc<Normalizer>,
        bazel_release: impl Into<String>,
    ) -> Self {
        let bazel_release = bazel_release.into();
        let configured_rule_inputs_supported =
            version::supports_configured_rule_inputs(&bazel_release);
        Self {
            context,
            file_hashes: FileHashCache::new(),
            normalizer,
            bazel_release,
            configured_rule_inputs_supported,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn bazel_release(&self) -> &str {
        &self.bazel_release
    }

    pub fn context(&self) -> &TargetContext {
        &self.context
    }

    /// The digest of the given configured target. Changes when any of the
    /// following change: the rule's attributes, class, or Starlark
    /// environment; the contents or owner-execute bit of source files it
    /// consumes; its configuration; the build-tool release; or any of the
    /// above recursively for its rule inputs.
    ///
    /// Idempotent: repeated calls return the memoised digest. Fails with
    /// [`HashError::LabelNotFound`] for targets absent from the context, and
    /// with [`HashError::NotComputedBeforeFrozen`] for uncomputed entries
    /// after [`freeze`](Self::freeze).
    pub fn hash(&self, label: &Label, configuration: &Configuration) -> Result<Vec<u8>, HashError> {
        let not_computed = || HashError::NotComputedBeforeFrozen {
            label: label.clone(),
            configuration: configuration.clone(),
        };

        let entry = {
            let mut state = self.state.lock();
            if state.frozen {
                match state.entries.get(label).and_then(|m| m.get(configuration)) {
                    Some(entry) => Arc::clone(entry),
                    None => return Err(not_computed()),
                }
            } else {
                Arc::clone(
                    state
                        .entries
                        .entry(label.clone())
                        .or_default()
                        .entry(configuration.clone())
                        .or_default(),
                )
            }
        };

        let mut slot = entry.digest.lock();
        if let Some(digest) = slot.as_ref() {
            return Ok(digest.clone());
        }
        // The freeze may have happened between entry creation and now; it
        // forbids any fresh computation (and hence any file read).
        if self.state.lock().frozen {
            return Err(not_computed());
        }
        let digest = self.hash_target(label, configuration)?;
        *slot = Some(digest.clone());
        Ok(digest)
    }

    /// The configurations in which a label is known to be configured.
    pub fn known_configurations(&self, label: &Label) -> SortedSet<Configuration> {
        match self.context.get(label) {
            Some(by_configuration) => by_configuration.keys().cloned().collect(),
            None => SortedSet::new(),
        }
    }

    /// Turn the cache into a pure lookup. Call before the working tree
    /// mutates; idempotent. The flag is read under the same lock as entry
    /// insertion, so every thread observes the transition atomically.
    pub fn freeze(&self) {
        self.state.lock().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen
    }

    pub fn parse_canonical_label(&self, text: &str) -> Result<Label, HashError> {
        self.normalizer
            .parse_canonical_label(text)
            .map_err(|source| HashError::Label { text: text.to_owned(), source })
    }

    /// A copy of the attribute with build-output-irrelevant detail redacted:
    /// the `explicitly_specified` bit is cleared, `generator_location` (an
    /// absolute path) loses its value, and labels are canonicalised.
    pub fn attribute_for_serialization(&self, attribute: &Attribute) -> Attribute {
        let mut normalized = attribute.clone();
        normalized.explicitly_specified = None;
        if normalized.name == "generator_location" {
            normalized.string_value = None;
        }
        self.normalizer.normalize_attribute(&mut normalized);
        normalized
    }

    fn hash_target(&self, label: &Label, configuration: &Configuration) -> Result<Vec<u8>, HashError> {
        let by_configuration = self
            .context
            .get(label)
            .ok_or_else(|| HashError::LabelNotFound { label: label.clone() })?;
        let configured_target = by_configuration.get(configuration).ok_or_else(|| {
            HashError::ConfigurationNotFound {
                label: label.clone(),
                configuration: configuration.clone(),
            }
        })?;

        match &configured_target.target {
            Target::SourceFile { source_file } => {
                let path = source_file.absolute_path();
                self.file_hashes
                    .hash(&path)
                    .map_err(|source| HashError::Io { path, source })
            }
            Target::Rule { rule } => self.hash_rule(rule, configuration),
            Target::GeneratedFile { generated_file } => {
                let generating = self.parse_canonical_label(&generated_file.generating_rule)?;
                let generating_hash = self.hash(&generating, configuration)?;
                let mut hasher = Sha256::new();
                write_label(&mut hasher, &generating);
                hasher.update(&generating_hash);
                Ok(hasher.finalize().to_vec())
            }
            // Bits of the default local toolchain depend on package groups;
            // they never affect outputs, so they digest to nothing.
            Target::PackageGroup { .. } => Ok(Vec::new()),
            Target::EnvironmentGroup { .. } => Err(HashError::UnsupportedTargetType {
                label: label.clone(),
                type_name: configured_target.target.type_name(),
            }),
        }
    }

    // If this function changes, so should walk_diffs.
    fn hash_rule(&self, rule: &Rule, configuration: &Configuration) -> Result<Vec<u8>, HashError> {
        let mut hasher = Sha256::new();
        // Release changes can alter how rules are evaluated even when the
        // rules themselves haven't changed.
        hasher.update(self.bazel_release.as_bytes());
        hasher.update(rule.rule_class.as_bytes());
        if let Some(environment) = &rule.skylark_environment_hash_code {
            hasher.update(environment.as_bytes());
        }
        hasher.update(configuration.for_hashing());

        let mut attributes: Vec<&Attribute> = rule.attribute.iter().collect();
        attributes.sort_by(|a, b| a.name.cmp(&b.name));
        for attribute in attributes {
            let normalized = self.attribute_for_serialization(attribute);
            let bytes = normalized.canonical_bytes().map_err(|source| {
                HashError::AttributeSerialization { name: attribute.name.clone(), source }
            })?;
            hasher.update(&bytes);
        }

        for input in self.configured_rule_inputs(rule, configuration)? {
            for input_configuration in &input.configurations {
                let input_hash = self.hash(&input.label, input_configuration)?;
                write_label(&mut hasher, &input.label);
                hasher.update(input_configuration.for_hashing());
                hasher.update(&input_hash);
            }
        }

        Ok(hasher.finalize().to_vec())
    }

    /// The rule's dependency edges, as (label, configurations) pairs in
    /// deterministic order.
    ///
    /// With typed configured rule inputs, each input names its configuration
    /// directly; an empty configuration means either "no transition" or
    /// "source file", disambiguated by looking the input up first under the
    /// depending rule's own configuration and then under the empty one.
    ///
    /// Without them, every known configuration of each untyped input label is
    /// walked, which over-approximates. Aliases never transition, so they
    /// narrow to a single configuration: the owner's for rule targets, the
    /// empty one for source files. Labels missing from the context entirely
    /// are skipped (known build-tool bugs put them there).
    pub fn configured_rule_inputs(
        &self,
        rule: &Rule,
        own_configuration: &Configuration,
    ) -> Result<Vec<LabelAndConfigurations>, HashError> {
        let mut inputs = Vec::new();
        if self.configured_rule_inputs_supported {
            for input in &rule.configured_rule_input {
                let label = self.parse_canonical_label(&input.label)?;
                let mut configuration =
                    Configuration::normalize(input.configuration_checksum.as_deref().unwrap_or(""));
                if configuration.is_none() {
                    let by_configuration = self.context.get(&label);
                    if by_configuration.map_or(false, |m| m.contains_key(own_configuration)) {
                        configuration = own_configuration.clone();
                    } else if !by_configuration.map_or(false, |m| m.contains_key(&configuration)) {
                        return Err(HashError::MissingConfiguredRuleInput {
                            rule: rule.name.clone(),
                            input: label,
                            input_configuration: configuration,
                            own_configuration: own_configuration.clone(),
                        });
                    }
                }
                inputs.push(LabelAndConfigurations { label, configurations: vec![configuration] });
            }
        } else {
            for input_text in &rule.rule_input {
                let label = self.parse_canonical_label(input_text)?;
                let dep_configurations: Vec<Configuration> = if rule.rule_class == "alias" {
                    // Aliases expanding across configurations have caused
                    // dependency cycles; narrow them up front.
                    let is_source_file = self.context.get(&label).map_or(true, |m| {
                        m.values().all(|ct| matches!(ct.target, Target::SourceFile { .. }))
                    });
                    if is_source_file {
                        vec![Configuration::none()]
                    } else {
                        vec![own_configuration.clone()]
                    }
                } else {
                    self.known_configurations(&label).to_vec()
                };

                let mut entry = LabelAndConfigurations { label: label.clone(), configurations: Vec::new() };
                for configuration in dep_configurations {
                    match self.hash(&label, &configuration) {
                        Ok(_) => entry.configurations.push(configuration),
                        Err(err) if err.is_label_not_found() => continue,
                        Err(err) => return Err(err),
                    }
                }
                inputs.push(entry);
            }
        }
        Ok(inputs)
    }
}

/// Length-prefix a label's canonical string into the digest, so that
/// adjacent variable-length fields cannot alias each other.
fn write_label(hasher: &mut Sha256, label: &Label) {
    let text = label.to_string();
    hasher.update((text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
}
