//! Targetscope Bazel adapter
//!
//! A typed wrapper around the `bazel` binary and its query output formats.
//! This crate knows how to invoke Bazel and how to parse what it prints; it
//! encodes no change-detection policy.

pub mod command;
pub mod configurations;
pub mod cquery;
pub mod info;
pub mod normalizer;

pub use command::{BazelCommand, CommandError, DefaultBazelCommand, ExecOutput};
pub use configurations::{
    diff_configurations, parse_configuration_dump, ConfigurationDump, ConfigurationDumpError,
};
pub use cquery::{
    Attribute, AttributeKind, ConfigurationSummary, ConfiguredRuleInput, ConfiguredTarget,
    CqueryResult, EnvironmentGroup, GeneratedFile, LabelDictUnaryEntry, LabelKeyedStringDictEntry,
    LabelListDictEntry, PackageGroup, Rule, SourceFile, StringDictEntry, Target,
};
pub use info::BazelInfoError;
pub use normalizer::Normalizer;
