//! Bazel subprocess invocation
//!
//! Invocations are `<bazel> <startup_args> <command> <args>`. Build-like
//! commands additionally receive the user's common build options, so that
//! queries see the same configuration the user builds with.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

use targetscope_core::version;

/// Commands which receive the user's common build options.
const BUILD_LIKE_COMMANDS: &[&str] = &["build", "config", "cquery", "test"];

/// Captured output of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit status code; zero on success.
    pub status: i32,

    pub stdout: Vec<u8>,

    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Stdout decoded lossily, trimmed of the trailing newline.
    pub fn stdout_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim_end_matches('\n').to_owned()
    }
}

/// Errors launching or plumbing a subprocess. A nonzero exit status is not an
/// error at this level; callers decide what a failed command means.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture output of {program}: {source}")]
    Capture {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spill cquery output through {path}: {source}")]
    OutputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A typed handle on the build tool.
pub trait BazelCommand: Send + Sync {
    /// Run `bazel <startup_args> <command> <args>` in `dir`, capturing output.
    fn execute(
        &self,
        dir: &Path,
        startup_args: &[String],
        command: &str,
        args: &[String],
    ) -> Result<ExecOutput, CommandError>;

    /// Run a cquery, routing its output through `--output_file` on releases
    /// that support it, to avoid stdout size limits on very large graphs.
    fn cquery(
        &self,
        bazel_release: &str,
        dir: &Path,
        startup_args: &[String],
        args: &[String],
    ) -> Result<ExecOutput, CommandError>;
}

/// The standard implementation: shells out to a `bazel` binary.
#[derive(Debug, Clone)]
pub struct DefaultBazelCommand {
    /// Bazel binary: a basename on `$PATH`, or an absolute or relative path.
    pub path: String,

    /// Startup options placed before every command.
    pub startup_opts: Vec<String>,

    /// Common options appended to build-like commands only.
    pub build_opts: Vec<String>,
}

impl DefaultBazelCommand {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), startup_opts: Vec::new(), build_opts: Vec::new() }
    }

    /// Assemble the full argument vector for an invocation.
    pub fn argv(&self, startup_args: &[String], command: &str, args: &[String]) -> Vec<String> {
        let mut argv =
            Vec::with_capacity(self.startup_opts.len() + startup_args.len() + 1 + self.build_opts.len() + args.len());
        argv.extend(self.startup_opts.iter().cloned());
        argv.extend(startup_args.iter().cloned());
        argv.push(command.to_owned());
        if BUILD_LIKE_COMMANDS.contains(&command) {
            argv.extend(self.build_opts.iter().cloned());
        }
        argv.extend(args.iter().cloned());
        argv
    }
}

impl BazelCommand for DefaultBazelCommand {
    fn execute(
        &self,
        dir: &Path,
        startup_args: &[String],
        command: &str,
        args: &[String],
    ) -> Result<ExecOutput, CommandError> {
        let argv = self.argv(startup_args, command, args);
        debug!(bazel = %self.path, ?argv, dir = %dir.display(), "running bazel");
        let output = Command::new(&self.path)
            .args(&argv)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn { program: self.path.clone(), source })?;
        Ok(ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn cquery(
        &self,
        bazel_release: &str,
        dir: &Path,
        startup_args: &[String],
        args: &[String],
    ) -> Result<ExecOutput, CommandError> {
        if !version::supports_cquery_output_file(bazel_release) {
            return self.execute(dir, startup_args, "cquery", args);
        }

        let spill = tempfile::Builder::new()
            .prefix("targetscope-cquery-")
            .suffix(".json")
            .tempfile()
            .map_err(|source| CommandError::OutputFile { path: std::env::temp_dir(), source })?;

        let mut full_args = args.to_vec();
        full_args.push(format!("--output_file={}", spill.path().display()));
        let mut output = self.execute(dir, startup_args, "cquery", &full_args)?;

        output.stdout = std::fs::read(spill.path())
            .map_err(|source| CommandError::OutputFile { path: spill.path().to_path_buf(), source })?;
        Ok(output)
    }
}
