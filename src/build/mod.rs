//! Build Runner - executes the project's build in a checkout.
//!
//! A non-zero exit is a result, not an error: it becomes a [`BuildAttempt`]
//! that the classifier and orchestrator inspect. [`BuildError`] is reserved
//! for situations where no attempt could be recorded at all.

mod runner;

pub use runner::BuildRunner;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::classify::FailureSignature;

/// Exit code recorded when the build is killed for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = -2;

/// Exit code recorded when the build was terminated by a signal
pub const KILLED_EXIT_CODE: i32 = -1;

/// Marker prefix for lines the runner adds to captured output
pub const OUTPUT_MARKER: &str = "[buildfixer]";

/// Errors that prevent a build attempt from being recorded
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Checkout missing or not a directory: {0}")]
    CheckoutMissing(PathBuf),

    #[error("Build tool not invocable ({command}): {reason}")]
    ToolNotInvocable { command: String, reason: String },

    #[error("Build cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the build is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCommand {
    /// `./gradlew` when an executable wrapper exists in the checkout, else `gradle`
    Gradle { args: Vec<String> },
    /// Arbitrary command line run through `sh -c`
    Shell(String),
}

impl Default for BuildCommand {
    fn default() -> Self {
        BuildCommand::Gradle {
            args: vec!["build".to_string(), "--stacktrace".to_string()],
        }
    }
}

impl BuildCommand {
    /// Build command from an optional configured shell line
    pub fn from_config(command: Option<&str>) -> Self {
        match command.map(str::trim).filter(|c| !c.is_empty()) {
            Some(cmd) => BuildCommand::Shell(cmd.to_string()),
            None => BuildCommand::default(),
        }
    }

    /// Program and arguments to spawn for `root`
    pub fn resolve(&self, root: &Path) -> (String, Vec<String>) {
        match self {
            BuildCommand::Gradle { args } => {
                let program = if has_gradle_wrapper(root) { "./gradlew" } else { "gradle" };
                (program.to_string(), args.clone())
            }
            BuildCommand::Shell(cmd) => ("sh".to_string(), vec!["-c".to_string(), cmd.clone()]),
        }
    }

    /// Human-readable command line for `root`
    pub fn describe(&self, root: &Path) -> String {
        match self {
            BuildCommand::Shell(cmd) => cmd.clone(),
            BuildCommand::Gradle { .. } => {
                let (program, args) = self.resolve(root);
                std::iter::once(program).chain(args).collect::<Vec<_>>().join(" ")
            }
        }
    }
}

/// Whether `root` contains an executable Gradle wrapper
pub fn has_gradle_wrapper(root: &Path) -> bool {
    let wrapper = root.join("gradlew");
    let Ok(meta) = std::fs::metadata(&wrapper) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Configuration for the build runner
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub command: BuildCommand,
    pub timeout: Duration,
    /// Cap on captured bytes per stream
    pub max_output_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: BuildCommand::default(),
            timeout: Duration::from_secs(600),
            max_output_bytes: 4 * 1024 * 1024,
        }
    }
}

impl BuildConfig {
    /// Config running `command` through the shell
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: BuildCommand::Shell(command.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }
}

/// One build invocation; immutable once appended to a run's history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildAttempt {
    pub index: usize,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub failure_signature: Option<FailureSignature>,
    pub started_at: DateTime<Utc>,
}

impl BuildAttempt {
    /// Whether the build exited 0
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether the build was killed for exceeding its timeout
    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    /// Attach the classified failure signature.
    pub fn with_signature(mut self, signature: Option<FailureSignature>) -> Self {
        self.failure_signature = signature;
        self
    }

    /// stdout and stderr joined, as the classifier reads them
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

#[cfg(test)]
pub(crate) fn attempt_fixture(index: usize, exit_code: i32, stderr: &str) -> BuildAttempt {
    BuildAttempt {
        index,
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
        duration_ms: 0,
        failure_signature: None,
        started_at: Utc::now(),
    }
}
