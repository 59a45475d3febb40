//! LLM-backed fix advisor.
//!
//! Renders the failure into a prompt, asks the model for one action and
//! parses the JSON action object out of the reply.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use super::{Advice, AdvisorError, AdvisorRequest, FixAdvisor};
use crate::llm::{CompletionRequest, LlmClient};
use crate::patch::{Edit, ProposedFix};
use crate::prompt::{FIX_REQUEST_TEMPLATE, FIX_SYSTEM_PROMPT, PromptRenderer};
use crate::properties::DEFAULT_PROPERTY_FILE;

const SYSTEM_TEMPLATE: &str = "fix_system";
const REQUEST_TEMPLATE: &str = "fix_request";

/// Action object the model replies with
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ActionReply {
    SetProperty {
        #[serde(default)]
        file: Option<PathBuf>,
        key: String,
        value: String,
        #[serde(default)]
        rationale: String,
    },
    ReplaceRange {
        file: PathBuf,
        anchor: String,
        replacement: String,
        #[serde(default)]
        line: Option<usize>,
        #[serde(default)]
        rationale: String,
    },
    ReplaceFile {
        file: PathBuf,
        content: String,
        #[serde(default)]
        rationale: String,
    },
    NoFix {
        #[serde(default)]
        reason: String,
    },
}

/// Advisor that asks an [`LlmClient`]
pub struct LlmFixAdvisor {
    client: Arc<dyn LlmClient>,
    renderer: PromptRenderer,
    max_tokens: u32,
    property_file: PathBuf,
}

impl LlmFixAdvisor {
    /// Advisor using the built-in prompt templates
    pub fn new(client: Arc<dyn LlmClient>, max_tokens: u32) -> Result<Self, AdvisorError> {
        Self::with_templates(client, max_tokens, FIX_SYSTEM_PROMPT, FIX_REQUEST_TEMPLATE)
    }

    /// Advisor with custom system and request templates
    pub fn with_templates(
        client: Arc<dyn LlmClient>,
        max_tokens: u32,
        system: &str,
        request: &str,
    ) -> Result<Self, AdvisorError> {
        let mut renderer = PromptRenderer::new();
        renderer
            .register_template(SYSTEM_TEMPLATE, system)
            .and_then(|_| renderer.register_template(REQUEST_TEMPLATE, request))
            .map_err(|e| AdvisorError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            renderer,
            max_tokens,
            property_file: PathBuf::from(DEFAULT_PROPERTY_FILE),
        })
    }

    /// File used for `set_property` replies that name none
    pub fn with_property_file(mut self, property_file: impl Into<PathBuf>) -> Self {
        self.property_file = property_file.into();
        self
    }

    fn build_request(&self, request: &AdvisorRequest) -> Result<CompletionRequest, AdvisorError> {
        let context = serde_json::json!({
            "signature": request.signature.to_string(),
            "error": request.stderr_excerpt,
            "files": request.files,
            "rejected": request.rejected,
            "property_key": request.property_key,
            "property_value": request.property_value,
        });

        let system = self
            .renderer
            .render_named(SYSTEM_TEMPLATE, &context)
            .map_err(|e| AdvisorError::Unavailable(e.to_string()))?;
        let user = self
            .renderer
            .render_named(REQUEST_TEMPLATE, &context)
            .map_err(|e| AdvisorError::Unavailable(e.to_string()))?;

        Ok(CompletionRequest::new(system)
            .with_user_message(user)
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.0))
    }
}

#[async_trait]
impl FixAdvisor for LlmFixAdvisor {
    async fn propose(&self, request: &AdvisorRequest) -> Result<Advice, AdvisorError> {
        let completion = self.build_request(request)?;
        debug!("Fix prompt for {} on {}", request.signature, self.client.model());

        let response = self
            .client
            .complete(completion)
            .await
            .map_err(|e| AdvisorError::Unavailable(e.to_string()))?;

        debug!("Advisor reply:\n{}", response.content);
        parse_advice(&response.content, &self.property_file)
    }
}

/// Parse a model reply into advice.
///
/// Uses the last fenced ```json block, else the outermost `{...}` span. A
/// bare `NO_FIX` action line is accepted as "no fix".
pub fn parse_advice(reply: &str, property_file: &std::path::Path) -> Result<Advice, AdvisorError> {
    let Some(json) = extract_json(reply) else {
        if reply.lines().any(|l| l.trim().trim_start_matches("Action:").trim() == "NO_FIX") {
            return Ok(Advice::NoFix {
                reason: "advisor answered NO_FIX".to_string(),
            });
        }
        return Err(AdvisorError::InvalidResponse("no JSON action object in reply".to_string()));
    };

    let action: ActionReply =
        serde_json::from_str(json).map_err(|e| AdvisorError::InvalidResponse(format!("bad action object: {}", e)))?;

    let fix = match action {
        ActionReply::NoFix { reason } => return Ok(Advice::NoFix { reason }),
        ActionReply::SetProperty {
            file,
            key,
            value,
            rationale,
        } => ProposedFix::new(
            file.unwrap_or_else(|| property_file.to_path_buf()),
            Edit::SetProperty { key, value },
            rationale,
        ),
        ActionReply::ReplaceRange {
            file,
            anchor,
            replacement,
            line,
            rationale,
        } => ProposedFix::new(
            file,
            Edit::ReplaceRange {
                anchor,
                replacement,
                line,
            },
            rationale,
        ),
        ActionReply::ReplaceFile {
            file,
            content,
            rationale,
        } => ProposedFix::new(file, Edit::ReplaceFile { content }, rationale),
    };

    if fix.target_file.as_os_str().is_empty() {
        return Err(AdvisorError::InvalidResponse("action names no file".to_string()));
    }
    Ok(Advice::Fix(fix))
}

fn extract_json(reply: &str) -> Option<&str> {
    if let Some(start) = reply.rfind("```json") {
        let body = &reply[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}
