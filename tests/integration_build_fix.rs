//! Build-fix run integration tests
//!
//! Drives whole runs through the public API with shell commands standing in
//! for Gradle and scripted or mock-LLM advisors.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use buildfixer::advisor::{Advice, LlmFixAdvisor, ScriptedAdvisor};
use buildfixer::build::BuildCommand;
use buildfixer::checkout::Checkout;
use buildfixer::engine::{ExhaustionReason, FixOutcome, Orchestrator, OrchestratorConfig, RunConfig, RunResult};
use buildfixer::llm::{LlmClient, MockLlmClient};
use buildfixer::patch::{PatchApplier, PatchError, ProposedFix};
use buildfixer::properties::PropertyEditor;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PROPERTIES: &str = "# Versions\r\ndepVersion=1.0\r\n\r\norg.gradle.jvmargs=-Xmx2g \\\r\n  -Dfile.encoding=UTF-8\r\n";

/// Fails like Gradle does until depVersion is 2.1
const DEP_BUILD: &str = "if grep -q '^depVersion=2.1' gradle.properties; then echo 'BUILD SUCCESSFUL'; else \
    printf 'FAILURE: Build failed with an exception.\\n\\n* What went wrong:\\nCould not resolve all files for configuration :compileClasspath.\\n> Could not find com.example:dep:2.0.\\n\\n* Try:\\n> Run with --info\\n' >&2; exit 1; fi";

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("gradle.properties"), PROPERTIES).unwrap();
    fs::write(
        dir.path().join("build.gradle"),
        "dependencies {\n    implementation \"com.example:dep:${depVersion}\"\n}\n",
    )
    .unwrap();
    dir
}

fn orchestrator(advisor: Arc<dyn buildfixer::advisor::FixAdvisor>, build: &str) -> Orchestrator {
    Orchestrator::with_config(
        advisor,
        PropertyEditor::default(),
        OrchestratorConfig {
            build_command: BuildCommand::Shell(build.to_string()),
            ..Default::default()
        },
    )
}

fn run_config(dir: &Path, max_retries: u32) -> RunConfig {
    RunConfig::new(dir, "depVersion", "2.0")
        .with_max_retries(max_retries)
        .with_build_timeout(Duration::from_secs(30))
        .with_advisor_timeout(Duration::from_secs(5))
}

/// Integration test: the advisor raises the version and the second build passes
#[tokio::test]
async fn test_dependency_bump_through_llm_advisor() {
    let dir = project();
    let client = Arc::new(MockLlmClient::with_texts([
        "Observation: com.example:dep:2.0 does not exist.\nThought: 2.1 is the closest release.\n```json\n{\"action\": \"set_property\", \"key\": \"depVersion\", \"value\": \"2.1\", \"rationale\": \"2.0 was never published\"}\n```",
    ]));
    let advisor = LlmFixAdvisor::new(client.clone(), 1024).unwrap();

    let report = orchestrator(Arc::new(advisor), DEP_BUILD)
        .run(&run_config(dir.path(), 2), &CancellationToken::new())
        .await;

    assert_eq!(report.result, RunResult::Succeeded(1));
    assert_eq!(report.history.len(), 2);
    assert_eq!(
        report.history[0].failure_signature.as_ref().unwrap().to_string(),
        "dependency_resolution:com.example:dep:2.0"
    );
    assert_eq!(report.final_property_value.as_deref(), Some("2.1"));

    let content = fs::read_to_string(dir.path().join("gradle.properties")).unwrap();
    assert_eq!(content, PROPERTIES.replace("depVersion=1.0", "depVersion=2.1"));

    let prompt = &client.requests()[0].messages[0].content;
    assert!(prompt.contains("Could not find com.example:dep:2.0."));
    assert!(prompt.contains("--- FILE build.gradle ---"));
    assert_eq!(client.model(), "mock");
}

/// Integration test: "no fix" ends the run after one build
#[tokio::test]
async fn test_no_fix_available() {
    let dir = project();
    let client = Arc::new(MockLlmClient::with_texts([
        "```json\n{\"action\": \"no_fix\", \"reason\": \"the artifact was withdrawn\"}\n```",
    ]));
    let advisor = LlmFixAdvisor::new(client, 1024).unwrap();

    let report = orchestrator(Arc::new(advisor), DEP_BUILD)
        .run(&run_config(dir.path(), 2), &CancellationToken::new())
        .await;

    assert_eq!(
        report.result,
        RunResult::ExhaustedRetries(ExhaustionReason::NoFixAvailable {
            reason: "the artifact was withdrawn".to_string()
        })
    );
    assert_eq!(report.history.len(), 1);
    assert!(report.intent_preserved());
}

/// Integration test: an unparseable reply is an advisor failure
#[tokio::test]
async fn test_unparseable_reply() {
    let dir = project();
    let client = Arc::new(MockLlmClient::with_texts(["Try upgrading things."]));
    let advisor = LlmFixAdvisor::new(client, 1024).unwrap();

    let report = orchestrator(Arc::new(advisor), DEP_BUILD)
        .run(&run_config(dir.path(), 2), &CancellationToken::new())
        .await;

    assert!(matches!(
        report.result,
        RunResult::ExhaustedRetries(ExhaustionReason::AdvisorFailed { .. })
    ));
    assert_eq!(report.history.len(), 1);
}

/// Integration test: a missing checkout aborts before any build
#[tokio::test]
async fn test_missing_checkout() {
    let dir = TempDir::new().unwrap();
    let advisor = Arc::new(ScriptedAdvisor::new(vec![]));

    let report = orchestrator(advisor.clone(), "true")
        .run(&run_config(&dir.path().join("gone"), 2), &CancellationToken::new())
        .await;

    assert!(matches!(report.result, RunResult::FatalAbort(_)));
    assert!(report.history.is_empty());
    assert_eq!(advisor.calls(), 0);
}

/// Integration test: history never outgrows the budget
#[tokio::test]
async fn test_history_bound_with_endless_fixes() {
    for max_retries in [0u32, 1, 3] {
        let dir = project();
        // Every build fails differently, every fix applies
        let build = "n=$(cat .n 2>/dev/null || echo 0); echo $((n+1)) > .n; echo \"src/F$n.java:3: error: boom\" >&2; exit 1";
        let script = (0..10)
            .map(|i| {
                Ok(Advice::Fix(ProposedFix::replace_file(
                    "build.gradle",
                    format!("// attempt {}\n", i),
                    "",
                )))
            })
            .collect();
        let report = orchestrator(Arc::new(ScriptedAdvisor::new(script)), build)
            .run(&run_config(dir.path(), max_retries), &CancellationToken::new())
            .await;

        assert!(report.history.len() <= max_retries as usize + 1);
        assert_eq!(report.result, RunResult::ExhaustedRetries(ExhaustionReason::BudgetSpent));
    }
}

/// Integration test: the report serializes with history and fixes
#[tokio::test]
async fn test_report_json() {
    let dir = project();
    let advisor = Arc::new(ScriptedAdvisor::new(vec![
        Ok(Advice::Fix(ProposedFix::replace_range("build.gradle", "no such text", "x", "stale"))),
        Ok(Advice::Fix(ProposedFix::set_property("gradle.properties", "depVersion", "2.1", "bump"))),
    ]));

    let report = orchestrator(advisor, DEP_BUILD)
        .run(&run_config(dir.path(), 3), &CancellationToken::new())
        .await;
    assert!(report.succeeded());
    assert!(matches!(report.fixes[0].outcome, FixOutcome::Rejected { .. }));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["result"]["outcome"], "succeeded");
    assert_eq!(json["result"]["detail"], 1);
    assert_eq!(json["history"].as_array().unwrap().len(), 2);
    assert_eq!(
        json["history"][0]["failure_signature"],
        "dependency_resolution:com.example:dep:2.0"
    );
    assert!(json["history"][1]["failure_signature"].is_null());
    assert_eq!(json["fixes"][0]["outcome"]["status"], "rejected");
    assert_eq!(json["fixes"][1]["fix"]["edit"]["kind"], "set_property");
    assert_eq!(json["final_property_value"], "2.1");
    assert_eq!(json["trace"].as_array().unwrap().last().unwrap(), "succeeded");
}

/// Integration test: a stale anchor leaves the file untouched
#[test]
fn test_stale_anchor_is_conflict() {
    let dir = project();
    let checkout = Checkout::open(dir.path()).unwrap();
    let before = fs::read(dir.path().join("build.gradle")).unwrap();

    let fix = ProposedFix::replace_range("build.gradle", "com.example:dep:1.0", "com.example:dep:2.1", "");
    let result = PatchApplier::new().apply(&checkout, &fix);

    assert!(matches!(result, Err(PatchError::EditConflict { .. })));
    assert_eq!(fs::read(dir.path().join("build.gradle")).unwrap(), before);
}

/// Integration test: setting a key keeps every other line verbatim
#[test]
fn test_set_property_preserves_other_lines() {
    let dir = project();
    let checkout = Checkout::open(dir.path()).unwrap();

    let update = PropertyEditor::default().set(&checkout, "depVersion", "2.0").unwrap();
    assert_eq!(update.previous.as_deref(), Some("1.0"));

    let after = fs::read_to_string(dir.path().join("gradle.properties")).unwrap();
    assert_eq!(after, PROPERTIES.replace("1.0", "2.0"));
}
