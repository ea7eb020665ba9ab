//! Per-revision query orchestration
//!
//! Runs the deps and matching cqueries for one revision, parses and indexes
//! the result, optionally filters platform-incompatible targets, and captures
//! the per-configuration detail map consulted by the diff walker.

use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use targetscope_bazel::{
    configurations::{parse_configuration_dump, ConfigurationDump, ConfigurationDumpError},
    info as bazel_info, BazelInfoError, CommandError, CqueryResult, Normalizer, Target,
};
use targetscope_core::{version, Configuration, Label, LabelError, SortedSet};

use crate::context::{AnalysisCacheClearStrategy, Context};
use crate::prefill::{prefill, PrefillError};
use crate::target_hash::{TargetContext, TargetHashCache};

/// A Bazel target pattern such as `//...` or `//java/...:all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetsList(String);

impl TargetsList {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetsList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TargetsList {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Info(#[from] BazelInfoError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to run cquery on {pattern} (status {status}): {stderr}")]
    CqueryFailed { pattern: String, status: i32, stderr: String },

    #[error("failed to parse cquery result: {source}")]
    CqueryParse {
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse label {text:?} returned from query: {source}")]
    Label {
        text: String,
        #[source]
        source: LabelError,
    },

    #[error("failed to run bazel config --output=json --dump_all (status {status}): {stderr}")]
    ConfigDumpFailed { status: i32, stderr: String },

    #[error(transparent)]
    ConfigurationDump(#[from] ConfigurationDumpError),

    #[error(
        "requested not to filter incompatible targets, but bazel release {release:?} \
         has a bug which requires filtering them"
    )]
    IncompatibleFilteringRequired { release: String },

    #[error("failed to {what} while clearing the analysis cache (status {status}): {stderr}")]
    AnalysisCacheClear { what: &'static str, status: i32, stderr: String },

    #[error("inconsistent cquery results before and after analysis cache clear: {what}")]
    InconsistentQueries { what: &'static str },

    #[error(transparent)]
    Prefill(#[from] PrefillError),
}

/// The top-level targets within a revision: those matching the user's
/// pattern, each with its per-configuration multiplicity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchingTargets {
    labels: SortedSet<Label>,
    labels_to_configurations: HashMap<Label, SortedSet<Configuration>>,
}

impl MatchingTargets {
    pub fn new(labels_to_configurations: HashMap<Label, SortedSet<Configuration>>) -> Self {
        Self {
            labels: labels_to_configurations.keys().cloned().collect(),
            labels_to_configurations,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The matching labels in sort order.
    pub fn labels(&self) -> &SortedSet<Label> {
        &self.labels
    }

    /// The configurations the label matched in; empty for unknown labels.
    pub fn configurations_for(&self, label: &Label) -> SortedSet<Configuration> {
        self.labels_to_configurations.get(label).cloned().unwrap_or_default()
    }

    pub fn contains(&self, label: &Label, configuration: &Configuration) -> bool {
        self.labels_to_configurations
            .get(label)
            .map_or(false, |configurations| configurations.contains(configuration))
    }
}

/// Everything captured about one revision of the repository.
pub struct QueryResults {
    pub matching_targets: MatchingTargets,

    /// All configured targets reachable from the matching set.
    pub transitive_configured_targets: Arc<TargetContext>,

    pub target_hash_cache: TargetHashCache,

    pub bazel_release: String,

    /// Set when the deps query failed but the snapshot is still usable as an
    /// empty "before" state. Checking this is the arbiter of success.
    pub query_error: Option<String>,

    /// Per-configuration detail, used to explain configuration changes.
    pub configurations: HashMap<Configuration, ConfigurationDump>,
}

impl QueryResults {
    /// Hash every matching target in parallel, then freeze the cache so the
    /// working tree can safely mutate.
    pub fn prefill_cache(&self) -> Result<(), QueryError> {
        Ok(prefill(&self.target_hash_cache, &self.matching_targets)?)
    }
}

fn output_base_args(context: &Context) -> Vec<String> {
    vec!["--output_base".to_owned(), context.bazel_output_base.clone()]
}

/// Query one revision of the workspace, currently checked out at `workspace`.
///
/// A deps-query failure returns `Ok` with an empty matching set and a
/// populated [`QueryResults::query_error`], so the caller can elect to treat
/// every "after" target as new. Any other failure is an error.
pub fn query_revision(
    context: &Context,
    workspace: &Path,
    targets: &TargetsList,
) -> Result<QueryResults, QueryError> {
    let bazel = context.bazel.as_ref();
    let release = bazel_info::release(bazel, workspace)?;

    let mapping = if version::supports_mod_dump_repo_mapping(&release)
        && bazel_info::is_bzlmod_enabled(bazel, workspace, &release)?
    {
        bazel_info::repo_mapping(bazel, workspace)?
    } else {
        HashMap::new()
    };
    let normalizer = Arc::new(Normalizer::new(mapping));

    let mut incompatible: BTreeSet<Label> = BTreeSet::new();
    match version::has_incompatible_targets_bug(&release) {
        Ok(true) => {
            if !context.filter_incompatible_targets {
                return Err(QueryError::IncompatibleFilteringRequired { release });
            }
            incompatible =
                find_targets_by_compatibility(context, workspace, targets.pattern(), false, &normalizer)?;
        }
        Ok(false) => {}
        Err(explanation) => warn!(
            "couldn't detect whether bazel release {release:?} mis-reports incompatible targets: \
             {explanation} - assuming it does not"
        ),
    }

    let mut deps_pattern = format!("deps({})", targets.pattern());
    for label in &incompatible {
        deps_pattern.push_str(&format!(" - {label}"));
    }

    let transitive_bytes = match run_cquery(context, workspace, &release, &deps_pattern, true) {
        Ok(bytes) => bytes,
        Err(err @ (QueryError::CqueryFailed { .. } | QueryError::Command(_))) => {
            return Ok(QueryResults {
                matching_targets: MatchingTargets::empty(),
                transitive_configured_targets: Arc::new(TargetContext::new()),
                target_hash_cache: TargetHashCache::new(
                    Arc::new(TargetContext::new()),
                    Arc::clone(&normalizer),
                    &release,
                ),
                bazel_release: release,
                query_error: Some(err.to_string()),
                configurations: HashMap::new(),
            });
        }
        Err(err) => return Err(err),
    };
    let parsed = CqueryResult::parse(&transitive_bytes)
        .map_err(|source| QueryError::CqueryParse { source })?;
    let transitive_configured_targets = Arc::new(index_cquery_result(parsed, &normalizer)?);

    let matching_bytes = run_cquery(context, workspace, &release, targets.pattern(), false)?;
    let matching_result = CqueryResult::parse(&matching_bytes)
        .map_err(|source| QueryError::CqueryParse { source })?;

    let compatible: Option<BTreeSet<Label>> = if context.filter_incompatible_targets {
        Some(find_targets_by_compatibility(context, workspace, targets.pattern(), true, &normalizer)?)
    } else {
        None
    };

    info!("matching labels to configurations");
    let mut labels_to_configurations: HashMap<Label, SortedSet<Configuration>> = HashMap::new();
    for result in &matching_result.results {
        let label = label_of(&result.target, &normalizer)?;
        if let Some(compatible) = &compatible {
            if !compatible.contains(&label) {
                continue;
            }
        }
        let configuration = Configuration::normalize(result.configuration_checksum());
        labels_to_configurations.entry(label).or_default().add(configuration);
    }
    let matching_targets = MatchingTargets::new(labels_to_configurations);

    let configurations = configuration_details(context, workspace)?;

    Ok(QueryResults {
        matching_targets,
        target_hash_cache: TargetHashCache::new(
            Arc::clone(&transitive_configured_targets),
            normalizer,
            &release,
        ),
        transitive_configured_targets,
        bazel_release: release,
        query_error: None,
        configurations,
    })
}

/// Index a parsed cquery result by (label, configuration), normalising every
/// label stored in attributes and rule inputs on the way in.
pub fn index_cquery_result(
    result: CqueryResult,
    normalizer: &Normalizer,
) -> Result<TargetContext, QueryError> {
    let mut configured_targets = TargetContext::with_capacity(result.results.len());
    for mut configured_target in result.results {
        let label = label_of(&configured_target.target, normalizer)?;
        normalizer.normalize_configured_target(&mut configured_target);
        let configuration = Configuration::normalize(configured_target.configuration_checksum());
        configured_targets
            .entry(label)
            .or_default()
            .insert(configuration, configured_target);
    }
    Ok(configured_targets)
}

fn label_of(target: &Target, normalizer: &Normalizer) -> Result<Label, QueryError> {
    normalizer
        .parse_canonical_label(target.name())
        .map_err(|source| QueryError::Label { text: target.name().to_owned(), source })
}

fn run_cquery(
    context: &Context,
    workspace: &Path,
    release: &str,
    pattern: &str,
    include_transitions: bool,
) -> Result<Vec<u8>, QueryError> {
    info!("running cquery on {pattern}");
    let mut args = vec!["--output=jsonproto".to_owned()];
    if include_transitions {
        args.push("--transitions=lite".to_owned());
    }
    args.push(pattern.to_owned());

    let output = context
        .bazel
        .cquery(release, workspace, &output_base_args(context), &args)?;
    if !output.success() {
        return Err(QueryError::CqueryFailed {
            pattern: pattern.to_owned(),
            status: output.status,
            stderr: output.stderr,
        });
    }
    Ok(output.stdout)
}

/// List the targets under `pattern` which do (or, with `compatible`, do not)
/// carry `IncompatiblePlatformProvider`.
///
/// Aliases report their referenced target rather than themselves, so they
/// are queried separately and their actual label is extracted from the
/// target's repr.
fn find_targets_by_compatibility(
    context: &Context,
    workspace: &Path,
    pattern: &str,
    compatible: bool,
    normalizer: &Normalizer,
) -> Result<BTreeSet<Label>, QueryError> {
    info!(
        "finding {} targets under {pattern}",
        if compatible { "compatible" } else { "incompatible" }
    );
    let negation = if compatible { "not " } else { "" };
    // The `or []` tolerates targets without providers on releases before the
    // fix in 6.2.0.
    let filter =
        format!(" if \"IncompatiblePlatformProvider\" {negation}in (providers(target) or []) else \"\"");

    let non_alias_args = vec![
        format!("{pattern} - kind(alias, {pattern})"),
        "--output=starlark".to_owned(),
        format!("--starlark:expr=target.label{filter}"),
    ];
    // Example repr of an alias target:
    // `<alias target //java/example:example_test of //java/example:OtherExampleTest>`
    let alias_args = vec![
        format!("kind(alias, {pattern})"),
        "--output=starlark".to_owned(),
        format!("--starlark:expr=repr(target).split(\" \")[2]{filter}"),
    ];

    let mut labels = BTreeSet::new();
    for args in [non_alias_args, alias_args] {
        let output = context
            .bazel
            .execute(workspace, &output_base_args(context), "cquery", &args)?;
        if !output.success() {
            return Err(QueryError::CqueryFailed {
                pattern: pattern.to_owned(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if line.is_empty() {
                continue;
            }
            let label = normalizer
                .parse_canonical_label(line)
                .map_err(|source| QueryError::Label { text: line.to_owned(), source })?;
            labels.insert(label);
        }
    }
    Ok(labels)
}

/// Fetch and index `bazel config --output=json --dump_all`.
pub(crate) fn configuration_details(
    context: &Context,
    workspace: &Path,
) -> Result<HashMap<Configuration, ConfigurationDump>, QueryError> {
    let output = context.bazel.execute(
        workspace,
        &output_base_args(context),
        "config",
        &["--output=json".to_owned(), "--dump_all".to_owned()],
    )?;
    if !output.success() {
        return Err(QueryError::ConfigDumpFailed { status: output.status, stderr: output.stderr });
    }
    Ok(parse_configuration_dump(&output.stdout)?)
}

/// Clear whatever analysis state could leak between cquery invocations,
/// according to the configured strategy.
pub(crate) fn clear_analysis_cache(context: &Context, workspace: &Path) -> Result<(), QueryError> {
    match context.analysis_cache_clear_strategy {
        AnalysisCacheClearStrategy::Skip => Ok(()),
        AnalysisCacheClearStrategy::Shutdown => {
            let output =
                context.bazel.execute(workspace, &output_base_args(context), "shutdown", &[])?;
            if !output.success() {
                return Err(QueryError::AnalysisCacheClear {
                    what: "shut down the bazel server",
                    status: output.status,
                    stderr: output.stderr,
                });
            }
            Ok(())
        }
        AnalysisCacheClearStrategy::Discard => {
            let output = context.bazel.execute(
                workspace,
                &output_base_args(context),
                "build",
                &["--discard_analysis_cache".to_owned()],
            )?;
            if !output.success() {
                return Err(QueryError::AnalysisCacheClear {
                    what: "discard the analysis cache",
                    status: output.status,
                    stderr: output.stderr,
                });
            }
            // --discard_analysis_cache defers some cleanup to the start of
            // the next build; a no-op build flushes it.
            let output = context.bazel.execute(workspace, &output_base_args(context), "build", &[])?;
            if !output.success() {
                return Err(QueryError::AnalysisCacheClear {
                    what: "run a no-op build after discarding the analysis cache",
                    status: output.status,
                    stderr: output.stderr,
                });
            }
            Ok(())
        }
    }
}
