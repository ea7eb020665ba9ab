//! Targetscope CLI
//!
//! Prints to stdout, one per line, the targets which may have changed
//! between a given revision and the current working-directory state. The
//! tool goes to some effort to be both thorough and minimal, but when in
//! doubt it leans towards over-building rather than under-building.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use targetscope_bazel::{info as bazel_info, ConfiguredTarget, DefaultBazelCommand};
use targetscope_core::{Difference, Label, RelPath};
use targetscope_engine::{
    walk_affected_targets, AnalysisCacheClearStrategy, BeforeQueryErrorBehavior, Context,
    EnforceClean, TargetsList,
};
use targetscope_git::{self as git, LabelledGitRev};

/// Determine the Bazel targets affected between two revisions.
#[derive(Parser)]
#[command(name = "targetscope")]
#[command(author, version, about)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// The "before" revision to compare against: a full or short commit
    /// hash, tag, branch, or any other commit-like string.
    before_revision: String,

    /// Working directory to query.
    #[arg(long, default_value = ".")]
    working_directory: PathBuf,

    /// Bazel binary (basename on $PATH, or absolute or relative path) to run.
    #[arg(long, default_value = "bazel")]
    bazel: String,

    /// Startup option to pass to Bazel (repeatable).
    #[arg(long = "bazel-startup-option")]
    bazel_startup_options: Vec<String>,

    /// Build option to pass to build-like Bazel commands (repeatable).
    #[arg(long = "bazel-option")]
    bazel_options: Vec<String>,

    /// How to treat an unclean repository:
    /// enforce-clean|allow-ignored|allow-dirty.
    #[arg(long, default_value = "enforce-clean")]
    enforce_clean: EnforceClean,

    /// Delete a created worktree at the end of the invocation instead of
    /// caching it for reuse.
    #[arg(long)]
    delete_cached_worktree: bool,

    /// File or directory prefix, relative to the working directory, which
    /// never affects the Bazel graph (repeatable).
    #[arg(long = "ignore-file")]
    ignore_files: Vec<String>,

    /// Target pattern to diff.
    #[arg(long, default_value = "//...")]
    targets: TargetsList,

    /// How to handle a query failure at the before revision:
    /// fatal|ignore-and-build-all.
    #[arg(long, default_value = "fatal")]
    before_query_error_behavior: BeforeQueryErrorBehavior,

    /// How to clear the Bazel analysis cache before queries:
    /// skip|shutdown|discard.
    #[arg(long, default_value = "skip")]
    analysis_cache_clear_strategy: AnalysisCacheClearStrategy,

    /// Diagnostic mode: run the deps query before and after clearing the
    /// analysis cache, and fail if the results differ.
    #[arg(long)]
    compare_queries_around_cache_clear: bool,

    /// Whether to drop platform-incompatible targets from the results.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    filter_incompatible_targets: bool,

    /// Explain (messily) why each target is affected.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let start = Instant::now();
    if let Err(err) = run() {
        // A sentinel which is not a valid label: callers piping stdout into
        // a build command must fail rather than silently build nothing.
        println!("Targetscope invocation Error");
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
    info!("finished after {:?}", start.elapsed());
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let working_directory = std::fs::canonicalize(&cli.working_directory).with_context(|| {
        format!("failed to resolve working directory {}", cli.working_directory.display())
    })?;

    let current_branch = git::rev_parse(&working_directory, "HEAD", true)
        .context("failed to get the current git revision")?;
    let original_revision = LabelledGitRev::resolve(&working_directory, &current_branch, "after")
        .context("failed to resolve the \"after\" (i.e. original) git revision")?;
    let before_revision = LabelledGitRev::resolve(&working_directory, &cli.before_revision, "before")
        .context("failed to resolve the \"before\" git revision")?;

    let bazel = DefaultBazelCommand {
        path: cli.bazel,
        startup_opts: cli.bazel_startup_options,
        build_opts: cli.bazel_options,
    };
    let bazel_output_base = bazel_info::output_base(&bazel, &working_directory)
        .context("failed to resolve the Bazel output base")?;

    let context = Context {
        workspace_path: working_directory,
        original_revision,
        bazel: Box::new(bazel),
        bazel_output_base,
        delete_cached_worktree: cli.delete_cached_worktree,
        ignored_files: cli.ignore_files.iter().map(RelPath::new).collect(),
        before_query_error_behavior: cli.before_query_error_behavior,
        analysis_cache_clear_strategy: cli.analysis_cache_clear_strategy,
        compare_queries_around_cache_clear: cli.compare_queries_around_cache_clear,
        filter_incompatible_targets: cli.filter_incompatible_targets,
        enforce_clean: cli.enforce_clean,
    };

    let verbose = cli.verbose;
    let mut print_affected =
        |label: &Label, differences: &[Difference], _: Option<&ConfiguredTarget>| {
            if verbose && !differences.is_empty() {
                let rendered: Vec<String> = differences.iter().map(ToString::to_string).collect();
                println!("{label} Changes: {}", rendered.join(", "));
            } else {
                println!("{label}");
            }
        };
    walk_affected_targets(&context, &before_revision, &cli.targets, verbose, &mut print_affected)?;

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
