//! LLM client layer used by the fix advisor.
//!
//! Each completion is a single stateless request. [`AnthropicClient`] talks
//! to the Messages API; [`MockLlmClient`] replays canned replies in tests.

pub mod anthropic;
pub mod client;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use client::{LlmClient, MockLlmClient};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, Usage};
