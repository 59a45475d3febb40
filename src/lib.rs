//! buildfixer - a build-fix orchestration engine for Gradle projects
//!
//! buildfixer applies a property change to a checkout, runs the build, and
//! on failure asks a fix advisor for an edit, applies it and retries until the
//! build is green or the retry budget is spent.

pub mod advisor;
pub mod build;
pub mod checkout;
pub mod classify;
pub mod engine;
pub mod error;
pub mod id;
pub mod llm;
pub mod patch;
pub mod prompt;
pub mod properties;

pub use engine::{Orchestrator, RunConfig, RunReport, RunResult};
pub use error::{BuildFixerError, Result};
