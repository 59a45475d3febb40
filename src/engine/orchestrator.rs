//! Orchestrator - drives one run from property change to a terminal state.
//!
//! Each attempt cycle:
//! 1. Builds the checkout (attempt index N)
//! 2. Classifies the failure, if any
//! 3. Stops on a repeated signature or a spent budget
//! 4. Asks the advisor for a fix, with the rejected proposals so far
//! 5. Applies the fix and builds again

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::{AbortReason, ExhaustionReason, FixOutcome, FixRecord, RunConfig, RunReport, RunResult, RunState};
use crate::advisor::{Advice, AdvisorAdapter, AdvisorError, AdvisorRequest, FixAdvisor, gather_relevant_files};
use crate::build::{BuildAttempt, BuildCommand, BuildConfig, BuildError, BuildRunner};
use crate::checkout::Checkout;
use crate::classify::{Classifier, FailureSignature, error_excerpt};
use crate::id::generate_run_id;
use crate::patch::PatchApplier;
use crate::properties::{PropertyEditor, PropertyError};

/// Settings shared by every run of an [`Orchestrator`]
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub build_command: BuildCommand,
    /// Cap on captured bytes per output stream
    pub max_output_bytes: usize,
    /// Cap on the error excerpt sent to the advisor
    pub excerpt_bytes: usize,
    /// Cap on each file sent to the advisor
    pub max_file_bytes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            build_command: BuildCommand::default(),
            max_output_bytes: 4 * 1024 * 1024,
            excerpt_bytes: 8 * 1024,
            max_file_bytes: 32 * 1024,
        }
    }
}

/// The build-fix state machine.
///
/// Holds no per-run state, so one instance can drive concurrent runs on
/// distinct checkouts.
pub struct Orchestrator {
    advisor: Arc<dyn FixAdvisor>,
    editor: PropertyEditor,
    applier: PatchApplier,
    config: OrchestratorConfig,
}

/// Mutable state of one run
struct RunContext {
    id: String,
    checkout: Option<Checkout>,
    history: Vec<BuildAttempt>,
    fixes: Vec<FixRecord>,
    trace: Vec<RunState>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            id: generate_run_id(),
            checkout: None,
            history: Vec::new(),
            fixes: Vec::new(),
            trace: Vec::new(),
        }
    }

    fn enter(&mut self, state: RunState) {
        match self.trace.last() {
            Some(previous) => info!("[{}] {} -> {}", self.id, previous, state),
            None => debug!("[{}] {}", self.id, state),
        }
        self.trace.push(state);
    }

    /// Signature of the attempt before the latest one
    fn preceding_signature(&self) -> Option<&FailureSignature> {
        let len = self.history.len();
        if len < 2 {
            return None;
        }
        self.history[len - 2].failure_signature.as_ref()
    }

    /// Whether an attempt older than the preceding one failed with `signature`
    fn seen_before(&self, signature: &FailureSignature) -> bool {
        let older = self.history.len().saturating_sub(2);
        self.history[..older]
            .iter()
            .any(|a| a.failure_signature.as_ref() == Some(signature))
    }
}

impl Orchestrator {
    /// Orchestrator with default build settings and `gradle.properties`
    pub fn new(advisor: Arc<dyn FixAdvisor>) -> Self {
        Self::with_config(advisor, PropertyEditor::default(), OrchestratorConfig::default())
    }

    pub fn with_config(advisor: Arc<dyn FixAdvisor>, editor: PropertyEditor, config: OrchestratorConfig) -> Self {
        Self {
            advisor,
            editor,
            applier: PatchApplier::new(),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute one run to a terminal state.
    ///
    /// Never fails: every outcome, including aborts, is described by the
    /// returned report.
    pub async fn run(&self, config: &RunConfig, cancel: &CancellationToken) -> RunReport {
        let started_at = Utc::now();
        let mut ctx = RunContext::new();
        info!(
            "[{}] Run started: {}={} in {} (max_retries={})",
            ctx.id,
            config.property_key,
            config.property_value,
            config.checkout_path.display(),
            config.max_retries
        );

        let result = self.drive(&mut ctx, config, cancel).await;
        ctx.enter(result.state());

        let final_property_value = ctx
            .checkout
            .as_ref()
            .and_then(|c| self.editor.get(c, &config.property_key).ok().flatten());

        match &result {
            RunResult::Succeeded(_) => info!("[{}] Run {}", ctx.id, result),
            _ => warn!("[{}] Run {}", ctx.id, result),
        }

        RunReport {
            run_id: ctx.id,
            checkout: config.checkout_path.clone(),
            property_key: config.property_key.clone(),
            property_value: config.property_value.clone(),
            result,
            history: ctx.history,
            fixes: ctx.fixes,
            trace: ctx.trace,
            final_property_value,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(&self, ctx: &mut RunContext, config: &RunConfig, cancel: &CancellationToken) -> RunResult {
        ctx.enter(RunState::Init);
        let checkout = match Checkout::open(&config.checkout_path) {
            Ok(checkout) => checkout,
            Err(e) => return RunResult::FatalAbort(AbortReason::Input(e.to_string())),
        };
        ctx.checkout = Some(checkout.clone());
        if cancel.is_cancelled() {
            return RunResult::FatalAbort(AbortReason::Cancelled);
        }

        ctx.enter(RunState::Mutating);
        match self.editor.set(&checkout, &config.property_key, &config.property_value) {
            Ok(update) => info!(
                "[{}] Set {} from {:?} to {:?}",
                ctx.id, update.key, update.previous, update.value
            ),
            Err(PropertyError::Io(e)) => return RunResult::FatalAbort(AbortReason::Infrastructure(e.to_string())),
            Err(e) => return RunResult::FatalAbort(AbortReason::Input(e.to_string())),
        }

        let runner = BuildRunner::new(BuildConfig {
            command: self.config.build_command.clone(),
            timeout: config.build_timeout,
            max_output_bytes: self.config.max_output_bytes,
        });
        let advisor = AdvisorAdapter::new(Arc::clone(&self.advisor), config.advisor_timeout);
        let classifier = Classifier::with_root(checkout.root());

        let mut retries_used: u32 = 0;
        let mut index: usize = 0;

        loop {
            ctx.enter(RunState::Building);
            let attempt = match runner.run(&checkout, index, cancel).await {
                Ok(attempt) => attempt,
                Err(e) => return abort_for_build(e),
            };
            let signature = classifier.classify(&attempt);
            let attempt = attempt.with_signature(signature.clone());
            let excerpt = error_excerpt(&attempt.combined_output(), self.config.excerpt_bytes);
            ctx.history.push(attempt);

            let Some(signature) = signature else {
                return RunResult::Succeeded(index);
            };
            info!("[{}] Attempt {} failed: {}", ctx.id, index, signature);

            if ctx.preceding_signature() == Some(&signature) {
                return RunResult::ExhaustedRetries(ExhaustionReason::RepeatedFailure {
                    signature: signature.to_string(),
                });
            }
            if ctx.seen_before(&signature) {
                warn!("[{}] Failure {} seen before; fixes may be cycling", ctx.id, signature);
            }
            if retries_used >= config.max_retries {
                return RunResult::ExhaustedRetries(ExhaustionReason::BudgetSpent);
            }

            let mut rejected: Vec<String> = Vec::new();
            loop {
                ctx.enter(RunState::Analyzing);
                let request = AdvisorRequest::new(signature.clone(), excerpt.clone())
                    .with_files(gather_relevant_files(
                        &checkout,
                        self.editor.file_name(),
                        Some(&signature),
                        self.config.max_file_bytes,
                    ))
                    .with_property_change(&config.property_key, &config.property_value)
                    .with_rejected(rejected.clone());

                let fix = match advisor.propose(&request, cancel).await {
                    Ok(Advice::Fix(fix)) => fix,
                    Ok(Advice::NoFix { reason }) => {
                        return RunResult::ExhaustedRetries(ExhaustionReason::NoFixAvailable { reason });
                    }
                    Err(e) => return exhausted_for_advisor(e),
                };

                ctx.enter(RunState::Fixing);
                retries_used += 1;
                match self.applier.apply(&checkout, &fix) {
                    Ok(applied) => {
                        info!("[{}] Applied {} (changed: {})", ctx.id, fix, applied.changed);
                        ctx.fixes.push(FixRecord {
                            attempt: index,
                            fix,
                            outcome: FixOutcome::Applied {
                                changed: applied.changed,
                            },
                        });
                        break;
                    }
                    Err(e) if e.is_rejection() => {
                        warn!("[{}] Rejected {}: {}", ctx.id, fix, e);
                        let reason = e.to_string();
                        rejected.push(format!("{}: {}", fix, reason));
                        ctx.fixes.push(FixRecord {
                            attempt: index,
                            fix,
                            outcome: FixOutcome::Rejected { reason: reason.clone() },
                        });
                        if retries_used >= config.max_retries {
                            return RunResult::ExhaustedRetries(ExhaustionReason::FixNotApplicable { reason });
                        }
                    }
                    Err(e) => return RunResult::FatalAbort(AbortReason::Infrastructure(e.to_string())),
                }
            }

            index += 1;
        }
    }
}

fn abort_for_build(error: BuildError) -> RunResult {
    match error {
        BuildError::Cancelled => RunResult::FatalAbort(AbortReason::Cancelled),
        BuildError::CheckoutMissing(path) => {
            RunResult::FatalAbort(AbortReason::Input(format!("checkout {} disappeared", path.display())))
        }
        other => RunResult::FatalAbort(AbortReason::Infrastructure(other.to_string())),
    }
}

fn exhausted_for_advisor(error: AdvisorError) -> RunResult {
    match error {
        AdvisorError::Cancelled => RunResult::FatalAbort(AbortReason::Cancelled),
        AdvisorError::Timeout(_) => RunResult::ExhaustedRetries(ExhaustionReason::AdvisorTimeout),
        other => RunResult::ExhaustedRetries(ExhaustionReason::AdvisorFailed {
            message: other.to_string(),
        }),
    }
}
