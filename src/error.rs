//! Error types for buildfixer
//!
//! Errors of the setup paths (opening checkouts, cloning, talking to the LLM,
//! rendering prompts). Failures inside a run are reported through
//! `RunResult`, and each component keeps its own error type.

use thiserror::Error;

/// Errors raised outside a run
#[derive(Debug, Error)]
pub enum BuildFixerError {
    /// Checkout path is missing or unusable
    #[error("Checkout error: {0}")]
    Checkout(String),

    /// LLM API error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Prompt rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Git clone error
    #[error("Repository error: {0}")]
    Repository(String),
}

/// Result type alias for buildfixer operations
pub type Result<T> = std::result::Result<T, BuildFixerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_error() {
        let err = BuildFixerError::Checkout("/tmp/missing does not exist".to_string());
        assert_eq!(err.to_string(), "Checkout error: /tmp/missing does not exist");
    }

    #[test]
    fn test_llm_error() {
        let err = BuildFixerError::Llm("rate limited".to_string());
        assert_eq!(err.to_string(), "LLM error: rate limited");
    }

    #[test]
    fn test_template_error() {
        let err = BuildFixerError::Template("unclosed block".to_string());
        assert_eq!(err.to_string(), "Template error: unclosed block");
    }

    #[test]
    fn test_repository_error() {
        let err = BuildFixerError::Repository("clone failed".to_string());
        assert_eq!(err.to_string(), "Repository error: clone failed");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(BuildFixerError::Checkout("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
