//! Fix Advisor Adapter - the boundary to the reasoning collaborator.
//!
//! The orchestrator sees an advisor as one async call from a failure to
//! either a [`ProposedFix`] or "no fix available". [`AdvisorAdapter`] bounds
//! that call with its own timeout and abandons it on cancellation; the call
//! is never retried here.

mod files;
mod llm;
mod scripted;

pub use files::{RelevantFile, gather_relevant_files};
pub use llm::{LlmFixAdvisor, parse_advice};
pub use scripted::ScriptedAdvisor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::classify::FailureSignature;
use crate::patch::ProposedFix;

/// Errors from the fix advisor
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Advisor timed out after {0:?}")]
    Timeout(Duration),

    #[error("Advisor unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid advisor response: {0}")]
    InvalidResponse(String),

    #[error("Advisor call cancelled")]
    Cancelled,
}

/// What the advisor is told about a failure
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorRequest {
    pub signature: FailureSignature,
    /// Excerpt of the failing build output
    pub stderr_excerpt: String,
    /// Files the advisor may edit, with their current content
    pub files: Vec<RelevantFile>,
    /// Earlier proposals for this failure that could not be applied, with reasons
    pub rejected: Vec<String>,
    /// The property change the run is trying to make
    pub property_key: Option<String>,
    pub property_value: Option<String>,
}

impl AdvisorRequest {
    pub fn new(signature: FailureSignature, stderr_excerpt: impl Into<String>) -> Self {
        Self {
            signature,
            stderr_excerpt: stderr_excerpt.into(),
            files: Vec::new(),
            rejected: Vec::new(),
            property_key: None,
            property_value: None,
        }
    }

    pub fn with_files(mut self, files: Vec<RelevantFile>) -> Self {
        self.files = files;
        self
    }

    pub fn with_property_change(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.property_key = Some(key.into());
        self.property_value = Some(value.into());
        self
    }

    pub fn with_rejected(mut self, rejected: Vec<String>) -> Self {
        self.rejected = rejected;
        self
    }
}

/// Outcome of asking the advisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advice {
    Fix(ProposedFix),
    NoFix { reason: String },
}

/// Reasoning collaborator proposing a fix for a build failure
#[async_trait]
pub trait FixAdvisor: Send + Sync {
    async fn propose(&self, request: &AdvisorRequest) -> Result<Advice, AdvisorError>;
}

/// Bounds advisor calls by a timeout and a cancellation token
#[derive(Clone)]
pub struct AdvisorAdapter {
    advisor: Arc<dyn FixAdvisor>,
    timeout: Duration,
}

impl AdvisorAdapter {
    pub fn new(advisor: Arc<dyn FixAdvisor>, timeout: Duration) -> Self {
        Self { advisor, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same advisor with a different timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            advisor: Arc::clone(&self.advisor),
            timeout,
        }
    }

    /// Ask the advisor once.
    pub async fn propose(&self, request: &AdvisorRequest, cancel: &CancellationToken) -> Result<Advice, AdvisorError> {
        if cancel.is_cancelled() {
            return Err(AdvisorError::Cancelled);
        }

        info!("Asking advisor about {}", request.signature);
        debug!(
            "Advisor request: {} files, {} rejected proposals, {} byte excerpt",
            request.files.len(),
            request.rejected.len(),
            request.stderr_excerpt.len()
        );

        let result = tokio::select! {
            outcome = tokio::time::timeout(self.timeout, self.advisor.propose(request)) => {
                outcome.unwrap_or(Err(AdvisorError::Timeout(self.timeout)))
            }
            () = cancel.cancelled() => Err(AdvisorError::Cancelled),
        };

        match &result {
            Ok(Advice::Fix(fix)) => info!("Advisor proposed {}: {}", fix, fix.rationale),
            Ok(Advice::NoFix { reason }) => info!("Advisor has no fix: {}", reason),
            Err(e) => warn!("Advisor failed: {}", e),
        }
        result
    }
}

impl std::fmt::Debug for AdvisorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisorAdapter").field("timeout", &self.timeout).finish()
    }
}
