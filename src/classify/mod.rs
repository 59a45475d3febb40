//! Failure Classifier - normalized failure signatures from raw build output.
//!
//! A signature is the orchestrator's notion of "the same failure": two
//! attempts that fail with equal signatures are treated as no progress.
//! Located failures render as `category:location`; anything unrecognized
//! falls back to a digest of the output with nondeterministic noise removed.

mod excerpt;
mod patterns;

pub use excerpt::error_excerpt;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::build::BuildAttempt;
use patterns::{Pattern, find};

/// Broad class of a build failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Source did not compile
    Compilation,
    /// A dependency or plugin could not be resolved
    DependencyResolution,
    /// Tests ran and failed
    TestFailure,
    /// The build script itself is broken
    BuildScript,
    /// Some other task failed
    TaskFailure,
    /// The build exceeded its timeout
    Timeout,
    /// Nothing recognizable
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Compilation => "compilation",
            FailureCategory::DependencyResolution => "dependency_resolution",
            FailureCategory::TestFailure => "test_failure",
            FailureCategory::BuildScript => "build_script",
            FailureCategory::TaskFailure => "task_failure",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Discriminating part of a signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignatureKey {
    /// File and line, coordinate, test, or task name
    Location(String),
    /// 16 hex chars of the SHA-256 of normalized output
    Digest(String),
}

/// Normalized identity of a failure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct FailureSignature {
    pub category: FailureCategory,
    pub key: SignatureKey,
}

impl FailureSignature {
    pub fn located(category: FailureCategory, location: impl Into<String>) -> Self {
        Self {
            category,
            key: SignatureKey::Location(location.into()),
        }
    }

    pub fn digest(category: FailureCategory, digest: impl Into<String>) -> Self {
        Self {
            category,
            key: SignatureKey::Digest(digest.into()),
        }
    }

    /// Location part, if the failure was located
    pub fn location(&self) -> Option<&str> {
        match &self.key {
            SignatureKey::Location(loc) => Some(loc),
            SignatureKey::Digest(_) => None,
        }
    }

    /// File named by the location, without a trailing `:line`
    pub fn location_file(&self) -> Option<PathBuf> {
        let location = self.location()?;
        if !matches!(
            self.category,
            FailureCategory::Compilation | FailureCategory::BuildScript
        ) {
            return None;
        }
        let file = match location.rsplit_once(':') {
            Some((file, line)) if line.chars().all(|c| c.is_ascii_digit()) => file,
            _ => location,
        };
        Some(PathBuf::from(file))
    }
}

impl fmt::Display for FailureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            SignatureKey::Location(loc) => write!(f, "{}:{}", self.category, loc),
            SignatureKey::Digest(hash) => write!(f, "{}#{}", self.category, hash),
        }
    }
}

impl From<FailureSignature> for String {
    fn from(sig: FailureSignature) -> Self {
        sig.to_string()
    }
}

/// Extracts failure signatures, relativizing paths to a checkout root
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    root: Option<PathBuf>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier that reports paths relative to `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Signature of a build attempt; `None` iff the build succeeded.
    pub fn classify(&self, attempt: &BuildAttempt) -> Option<FailureSignature> {
        self.classify_output(attempt.exit_code, &attempt.combined_output())
    }

    /// Signature of raw output with the given exit code.
    pub fn classify_output(&self, exit_code: i32, output: &str) -> Option<FailureSignature> {
        if exit_code == 0 {
            return None;
        }
        if exit_code == crate::build::TIMEOUT_EXIT_CODE {
            return Some(FailureSignature::located(FailureCategory::Timeout, "build"));
        }

        let signature = self
            .compilation(output)
            .or_else(|| dependency(output))
            .or_else(|| self.build_script(output))
            .or_else(|| test_failure(output))
            .or_else(|| task_failure(output))
            .unwrap_or_else(|| FailureSignature::digest(FailureCategory::Unknown, output_digest(output)));

        Some(signature)
    }

    fn compilation(&self, output: &str) -> Option<FailureSignature> {
        [Pattern::Javac, Pattern::KotlinLegacy, Pattern::Kotlin, Pattern::Groovy]
            .into_iter()
            .find_map(|p| {
                let caps = find(p, output)?;
                let file = caps.name("file")?.as_str();
                let line = caps.name("line")?.as_str();
                Some(FailureSignature::located(
                    FailureCategory::Compilation,
                    format!("{}:{}", self.relative(file), line),
                ))
            })
    }

    fn build_script(&self, output: &str) -> Option<FailureSignature> {
        let caps = find(Pattern::ScriptLine, output)?;
        let file = self.relative(caps.name("file")?.as_str());
        let location = match caps.name("line") {
            Some(line) => format!("{}:{}", file, line.as_str()),
            None => file,
        };
        Some(FailureSignature::located(FailureCategory::BuildScript, location))
    }

    fn relative(&self, file: &str) -> String {
        let file = file.strip_prefix("file://").unwrap_or(file);
        let path = Path::new(file);
        match &self.root {
            Some(root) => path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| file.to_string()),
            None => file.to_string(),
        }
    }
}

/// Classify with no checkout root.
pub fn classify(attempt: &BuildAttempt) -> Option<FailureSignature> {
    Classifier::new().classify(attempt)
}

fn dependency(output: &str) -> Option<FailureSignature> {
    if let Some(caps) = find(Pattern::Coordinate, output) {
        let coordinate = caps.name("coord")?.as_str().trim_end_matches('.');
        return Some(FailureSignature::located(FailureCategory::DependencyResolution, coordinate));
    }
    if let Some(caps) = find(Pattern::PluginNotFound, output) {
        let plugin = caps.name("plugin")?.as_str();
        return Some(FailureSignature::located(
            FailureCategory::DependencyResolution,
            format!("plugin:{}", plugin),
        ));
    }
    let caps = find(Pattern::Configuration, output)?;
    Some(FailureSignature::located(
        FailureCategory::DependencyResolution,
        caps.name("config")?.as_str(),
    ))
}

fn test_failure(output: &str) -> Option<FailureSignature> {
    let caps = find(Pattern::FailedTest, output)?;
    let class = caps.name("class")?.as_str();
    let method = caps.name("method")?.as_str().trim();
    Some(FailureSignature::located(
        FailureCategory::TestFailure,
        format!("{} > {}", class, method),
    ))
}

fn task_failure(output: &str) -> Option<FailureSignature> {
    let caps = find(Pattern::FailedTask, output)?;
    let task = caps.name("task")?.as_str();
    let name = task.rsplit(':').next().unwrap_or(task);

    let category = if name.starts_with("compile") {
        FailureCategory::Compilation
    } else if name == "test" || name.ends_with("Test") {
        FailureCategory::TestFailure
    } else {
        FailureCategory::TaskFailure
    };
    Some(FailureSignature::located(category, task))
}

/// Digest of output with timing and process noise removed
pub fn output_digest(output: &str) -> String {
    let normalized = patterns::normalize(output);
    let hash = Sha256::digest(normalized.as_bytes());
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{TIMEOUT_EXIT_CODE, attempt_fixture};

    fn sig(exit_code: i32, output: &str) -> String {
        Classifier::new()
            .classify_output(exit_code, output)
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_success_has_no_signature() {
        assert!(classify(&attempt_fixture(0, 0, "warning: deprecated")).is_none());
    }

    #[test]
    fn test_timeout() {
        assert_eq!(sig(TIMEOUT_EXIT_CODE, "anything"), "timeout:build");
    }

    #[test]
    fn test_javac_error() {
        let output = "> Task :app:compileJava FAILED\n/work/app/src/main/java/App.java:12: error: cannot find symbol\n    Foo.bar();\n";
        let signature = Classifier::with_root("/work").classify_output(1, output).unwrap();
        assert_eq!(signature.to_string(), "compilation:app/src/main/java/App.java:12");
        assert_eq!(signature.location_file(), Some(PathBuf::from("app/src/main/java/App.java")));
    }

    #[test]
    fn test_kotlin_errors() {
        assert_eq!(
            sig(1, "e: file:///work/src/Main.kt:7:13 Unresolved reference: foo\n"),
            "compilation:/work/src/Main.kt:7"
        );
        assert_eq!(
            sig(1, "e: /work/src/Main.kt: (9, 5): Type mismatch\n"),
            "compilation:/work/src/Main.kt:9"
        );
    }

    #[test]
    fn test_groovy_error() {
        assert_eq!(
            sig(1, "/work/src/Util.groovy: 4: unable to resolve class Foo\n"),
            "compilation:/work/src/Util.groovy:4"
        );
    }

    #[test]
    fn test_unresolved_coordinate() {
        let output = "FAILURE: Build failed with an exception.\n\n* What went wrong:\nExecution failed for task ':app:compileJava'.\n> Could not resolve all files for configuration ':app:compileClasspath'.\n   > Could not find com.example:dep:2.0.\n";
        assert_eq!(sig(1, output), "dependency_resolution:com.example:dep:2.0");
        assert_eq!(
            sig(1, "Could not resolve com.example:dep:2.0\n"),
            "dependency_resolution:com.example:dep:2.0"
        );
    }

    #[test]
    fn test_unresolved_configuration_only() {
        let output = "* What went wrong:\nCould not resolve all dependencies for configuration ':runtimeClasspath'.\n> timeout\n";
        assert_eq!(sig(1, output), "dependency_resolution::runtimeClasspath");
    }

    #[test]
    fn test_plugin_not_found() {
        let output = "* What went wrong:\nPlugin [id: 'org.example.tool', version: '9.9'] was not found in any of the following sources:\n";
        assert_eq!(sig(1, output), "dependency_resolution:plugin:org.example.tool");
    }

    #[test]
    fn test_build_script_error() {
        let output = "* Where:\nBuild file '/work/app/build.gradle' line: 14\n\n* What went wrong:\nA problem occurred evaluating project ':app'.\n";
        let signature = Classifier::with_root("/work").classify_output(1, output).unwrap();
        assert_eq!(signature.to_string(), "build_script:app/build.gradle:14");
        assert_eq!(signature.location_file(), Some(PathBuf::from("app/build.gradle")));
    }

    #[test]
    fn test_failing_test() {
        let output = "> Task :test\n\ncom.example.CalculatorTest > addsNumbers() FAILED\n    org.opentest4j.AssertionFailedError at CalculatorTest.java:14\n";
        assert_eq!(sig(1, output), "test_failure:com.example.CalculatorTest > addsNumbers()");
    }

    #[test]
    fn test_task_failure() {
        assert_eq!(
            sig(1, "Execution failed for task ':app:lint'.\n> Lint found errors\n"),
            "task_failure::app:lint"
        );
        assert_eq!(
            sig(1, "Execution failed for task ':app:compileKotlin'.\n> Compilation error\n"),
            "compilation::app:compileKotlin"
        );
        assert_eq!(
            sig(1, "Execution failed for task ':test'.\n> There were failing tests\n"),
            "test_failure::test"
        );
    }

    #[test]
    fn test_unknown_is_digest() {
        let signature = Classifier::new().classify_output(1, "something odd happened").unwrap();
        assert_eq!(signature.category, FailureCategory::Unknown);
        let rendered = signature.to_string();
        assert!(rendered.starts_with("unknown#"));
        assert_eq!(rendered.len(), "unknown#".len() + 16);
        assert!(signature.location().is_none());
        assert!(signature.location_file().is_none());
    }

    #[test]
    fn test_unknown_digest_ignores_noise() {
        let a = "Starting a Gradle Daemon (pid: 4411)\nsomething odd at 0x7ffde4a1 after 3.2s\n2024-05-01T10:00:00Z done   \nBUILD FAILED in 12s\n";
        let b = "Starting a Gradle Daemon (pid: 98127)\nsomething odd at 0x55aa01 after 17s\n2025-11-30T23:59:59Z done\nBUILD FAILED in 1m 3s\n";
        assert_eq!(sig(1, a), sig(1, b));

        let c = "something else entirely\n";
        assert_ne!(sig(1, a), sig(1, c));
    }

    #[test]
    fn test_signature_serializes_as_string() {
        let signature = FailureSignature::located(FailureCategory::DependencyResolution, "g:a:1");
        assert_eq!(
            serde_json::to_value(&signature).unwrap(),
            serde_json::json!("dependency_resolution:g:a:1")
        );
    }

    #[test]
    fn test_compilation_wins_over_task_failure() {
        let output = "Execution failed for task ':compileJava'.\n/w/A.java:3: error: ';' expected\n";
        assert_eq!(sig(1, output), "compilation:/w/A.java:3");
    }
}
