//! Typed model of Bazel's cquery result
//!
//! Mirrors the `analysis.CqueryResult` message as rendered by
//! `cquery --output=jsonproto`: a list of configured targets, each a tagged
//! union over rules, source files, generated files, and package groups, with
//! typed attributes and (on newer releases) configured rule inputs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The top-level cquery reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CqueryResult {
    #[serde(default)]
    pub results: Vec<ConfiguredTarget>,
}

impl CqueryResult {
    /// Parse the jsonproto bytes written by `cquery --output=jsonproto`.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A target instance under a specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredTarget {
    pub target: Target,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigurationSummary>,
}

impl ConfiguredTarget {
    /// The configuration checksum, empty for unconfigured targets such as
    /// source files.
    pub fn configuration_checksum(&self) -> &str {
        self.configuration.as_ref().map(|c| c.checksum.as_str()).unwrap_or("")
    }
}

/// The configuration stanza attached to a configured target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSummary {
    #[serde(default)]
    pub checksum: String,
}

/// One of the target variants Bazel reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Target {
    #[serde(rename = "RULE")]
    Rule { rule: Rule },

    #[serde(rename = "SOURCE_FILE")]
    SourceFile {
        #[serde(rename = "sourceFile")]
        source_file: SourceFile,
    },

    #[serde(rename = "GENERATED_FILE")]
    GeneratedFile {
        #[serde(rename = "generatedFile")]
        generated_file: GeneratedFile,
    },

    #[serde(rename = "PACKAGE_GROUP")]
    PackageGroup {
        #[serde(rename = "packageGroup")]
        package_group: PackageGroup,
    },

    #[serde(rename = "ENVIRONMENT_GROUP")]
    EnvironmentGroup {
        #[serde(rename = "environmentGroup")]
        environment_group: EnvironmentGroup,
    },
}

impl Target {
    /// The target's own label string, before normalisation.
    pub fn name(&self) -> &str {
        match self {
            Target::Rule { rule } => &rule.name,
            Target::SourceFile { source_file } => &source_file.name,
            Target::GeneratedFile { generated_file } => &generated_file.name,
            Target::PackageGroup { package_group } => &package_group.name,
            Target::EnvironmentGroup { environment_group } => &environment_group.name,
        }
    }

    /// The variant's wire name, used when reporting a changed target type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Target::Rule { .. } => "RULE",
            Target::SourceFile { .. } => "SOURCE_FILE",
            Target::GeneratedFile { .. } => "GENERATED_FILE",
            Target::PackageGroup { .. } => "PACKAGE_GROUP",
            Target::EnvironmentGroup { .. } => "ENVIRONMENT_GROUP",
        }
    }

    pub fn as_rule(&self) -> Option<&Rule> {
        match self {
            Target::Rule { rule } => Some(rule),
            _ => None,
        }
    }
}

/// A rule target: class, attributes, and dependency edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    pub rule_class: String,

    /// Digest of the Starlark environment the rule was defined in; absent
    /// for natively implemented rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skylark_environment_hash_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute: Vec<Attribute>,

    /// Untyped rule inputs, the only edge data on older releases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_input: Vec<String>,

    /// Typed rule inputs carrying the dependency's configuration, reported
    /// by releases with configured-rule-input support.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configured_rule_input: Vec<ConfiguredRuleInput>,
}

/// An edge to a dependency together with its configuration checksum.
/// An empty checksum means "no transition" or "source file"; the engine
/// disambiguates against its context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredRuleInput {
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_checksum: Option<String>,
}

/// A file on disk referenced by the build graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visibility_label: Vec<String>,
}

impl SourceFile {
    /// The absolute path to this source file on disk.
    ///
    /// Before Bazel 5 (or with `incompatible_display_source_file_location`
    /// disabled) the location points at the owning BUILD file and the file
    /// name must be appended; afterwards it is the file's own path. Both are
    /// handled, as is the pre-5 absence of `:line:column` suffixes.
    pub fn absolute_path(&self) -> PathBuf {
        let location = self.location.as_deref().unwrap_or("");
        let location = match location.find(':') {
            Some(idx) => &location[..idx],
            None => location,
        };
        let path = PathBuf::from(location);
        let base = path.file_name().and_then(|b| b.to_str()).unwrap_or("");
        if base == "BUILD" || base == "BUILD.bazel" {
            let file = match self.name.rfind(':') {
                Some(idx) => &self.name[idx + 1..],
                None => &self.name,
            };
            match path.parent() {
                Some(dir) => dir.join(file),
                None => PathBuf::from(file),
            }
        } else {
            path
        }
    }
}

/// A file produced by another rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub name: String,

    pub generating_rule: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Treated as opaque; package groups never affect build outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageGroup {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentGroup {
    pub name: String,
}

/// The attribute's value discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeKind {
    Integer,
    String,
    Label,
    Output,
    StringList,
    LabelList,
    OutputList,
    DistributionSet,
    License,
    StringDict,
    FilesetEntryList,
    LabelListDict,
    StringListDict,
    Boolean,
    Tristate,
    IntegerList,
    LabelDictUnary,
    SelectorList,
    LabelKeyedStringDict,
    #[serde(other)]
    Unknown,
}

/// A typed, named field of a rule.
///
/// Only the value variants the engine inspects are modelled as fields; the
/// canonical serialisation is this struct's own JSON rendering, which is
/// deterministic because field order is fixed and empty values are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: AttributeKind,

    /// Whether the attribute was set in the BUILD file rather than
    /// defaulted. Redacted before hashing and diffing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicitly_specified: Option<bool>,

    /// Set on attributes whose labels influence naming but not the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodep: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_value: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tristate_value: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_list_value: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int_list_value: Vec<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_dict_value: Vec<StringDictEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_dict_unary_value: Vec<LabelDictUnaryEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_list_dict_value: Vec<LabelListDictEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_keyed_string_dict_value: Vec<LabelKeyedStringDictEntry>,
}

impl Attribute {
    /// A minimal attribute with just a name and kind, for tests and
    /// synthesized values.
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            explicitly_specified: None,
            nodep: None,
            string_value: None,
            int_value: None,
            boolean_value: None,
            tristate_value: None,
            string_list_value: Vec::new(),
            int_list_value: Vec::new(),
            string_dict_value: Vec::new(),
            label_dict_unary_value: Vec::new(),
            label_list_dict_value: Vec::new(),
            label_keyed_string_dict_value: Vec::new(),
        }
    }

    /// The deterministic byte serialisation mixed into rule digests.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringDictEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDictUnaryEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelListDictEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelKeyedStringDictEntry {
    pub key: String,
    pub value: String,
}
