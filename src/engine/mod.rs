//! Build-Fix Orchestration Engine - run types and the orchestrator.
//!
//! A run moves through an explicit state machine:
//!
//! ```text
//! Init -> Mutating -> Building -> Succeeded
//!                        |
//!                        +-> Analyzing -> Fixing -> Building ...
//!                        |       |           |
//!                        +-------+-----------+--> ExhaustedRetries | FatalAbort
//! ```
//!
//! Every run ends in exactly one terminal state and yields a [`RunReport`]
//! carrying the full, append-only attempt history.

mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorConfig};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::build::BuildAttempt;
use crate::id::generate_run_id;
use crate::patch::ProposedFix;

/// Default retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// States of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Mutating,
    Building,
    Analyzing,
    Fixing,
    Succeeded,
    ExhaustedRetries,
    FatalAbort,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::ExhaustedRetries | RunState::FatalAbort)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Mutating => "mutating",
            RunState::Building => "building",
            RunState::Analyzing => "analyzing",
            RunState::Fixing => "fixing",
            RunState::Succeeded => "succeeded",
            RunState::ExhaustedRetries => "exhausted_retries",
            RunState::FatalAbort => "fatal_abort",
        };
        write!(f, "{}", name)
    }
}

/// Inputs of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub checkout_path: PathBuf,
    pub property_key: String,
    pub property_value: String,
    /// Builds after the first one, plus rejected fixes, allowed in total
    pub max_retries: u32,
    pub build_timeout: Duration,
    pub advisor_timeout: Duration,
}

impl RunConfig {
    pub fn new(
        checkout_path: impl Into<PathBuf>,
        property_key: impl Into<String>,
        property_value: impl Into<String>,
    ) -> Self {
        Self {
            checkout_path: checkout_path.into(),
            property_key: property_key.into(),
            property_value: property_value.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            build_timeout: Duration::from_secs(600),
            advisor_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn with_advisor_timeout(mut self, timeout: Duration) -> Self {
        self.advisor_timeout = timeout;
        self
    }
}

/// Why a run stopped without a green build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// The build still failed when the retry budget ran out
    BudgetSpent,
    /// The same failure signature occurred twice in a row
    RepeatedFailure { signature: String },
    /// The advisor had nothing to propose
    NoFixAvailable { reason: String },
    /// The last proposal could not be applied and no budget remained
    FixNotApplicable { reason: String },
    AdvisorTimeout,
    AdvisorFailed { message: String },
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustionReason::BudgetSpent => write!(f, "retry budget spent"),
            ExhaustionReason::RepeatedFailure { signature } => write!(f, "repeated failure {}", signature),
            ExhaustionReason::NoFixAvailable { reason } => write!(f, "no fix available: {}", reason),
            ExhaustionReason::FixNotApplicable { reason } => write!(f, "fix not applicable: {}", reason),
            ExhaustionReason::AdvisorTimeout => write!(f, "advisor timed out"),
            ExhaustionReason::AdvisorFailed { message } => write!(f, "advisor failed: {}", message),
        }
    }
}

/// Why a run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AbortReason {
    /// Missing checkout or unusable property file
    Input(String),
    /// Spawn failure, filesystem failure and the like
    Infrastructure(String),
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Input(msg) => write!(f, "invalid input: {}", msg),
            AbortReason::Infrastructure(msg) => write!(f, "infrastructure error: {}", msg),
            AbortReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RunResult {
    /// Index of the green build attempt
    Succeeded(usize),
    ExhaustedRetries(ExhaustionReason),
    FatalAbort(AbortReason),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Succeeded(_))
    }

    /// Terminal state this result corresponds to
    pub fn state(&self) -> RunState {
        match self {
            RunResult::Succeeded(_) => RunState::Succeeded,
            RunResult::ExhaustedRetries(_) => RunState::ExhaustedRetries,
            RunResult::FatalAbort(_) => RunState::FatalAbort,
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Succeeded(idx) => write!(f, "succeeded on attempt {}", idx),
            RunResult::ExhaustedRetries(reason) => write!(f, "exhausted retries: {}", reason),
            RunResult::FatalAbort(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// What happened to a proposed fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FixOutcome {
    Applied { changed: bool },
    Rejected { reason: String },
}

/// A proposal and its fate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixRecord {
    /// Index of the failed attempt the proposal responded to
    pub attempt: usize,
    pub fix: ProposedFix,
    pub outcome: FixOutcome,
}

/// Everything a caller learns from a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub checkout: PathBuf,
    pub property_key: String,
    pub property_value: String,
    pub result: RunResult,
    pub history: Vec<BuildAttempt>,
    pub fixes: Vec<FixRecord>,
    /// States entered, in order, ending with the terminal state
    pub trace: Vec<RunState>,
    /// Value of the requested property when the run ended
    pub final_property_value: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Report for a run that could not start, e.g. because its checkout
    /// could not be created.
    pub fn aborted(config: &RunConfig, reason: AbortReason) -> Self {
        let now = Utc::now();
        Self {
            run_id: generate_run_id(),
            checkout: config.checkout_path.clone(),
            property_key: config.property_key.clone(),
            property_value: config.property_value.clone(),
            result: RunResult::FatalAbort(reason),
            history: Vec::new(),
            fixes: Vec::new(),
            trace: vec![RunState::Init, RunState::FatalAbort],
            final_property_value: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_success()
    }

    /// Whether the requested property still holds the requested value
    pub fn intent_preserved(&self) -> bool {
        self.final_property_value.as_deref() == Some(self.property_value.as_str())
    }

    /// Number of fixes that were applied to the checkout
    pub fn applied_fixes(&self) -> usize {
        self.fixes
            .iter()
            .filter(|f| matches!(f.outcome, FixOutcome::Applied { .. }))
            .count()
    }
}
