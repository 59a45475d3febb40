use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use buildfixer::build::BuildCommand;
use buildfixer::engine::{DEFAULT_MAX_RETRIES, OrchestratorConfig};
use buildfixer::llm::AnthropicConfig;
use buildfixer::llm::anthropic::{DEFAULT_API_KEY_ENV, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use buildfixer::properties::DEFAULT_PROPERTY_FILE;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub build: BuildSection,
    pub advisor: AdvisorSection,
    pub run: RunSection,
    pub checkout: CheckoutSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Shell command replacing the Gradle default
    pub command: Option<String>,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub property_file: PathBuf,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            command: None,
            timeout_ms: 600_000,
            max_output_bytes: 4 * 1024 * 1024,
            property_file: PathBuf::from(DEFAULT_PROPERTY_FILE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorSection {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub api_key_env: String,
    pub excerpt_bytes: usize,
    pub max_file_bytes: usize,
    /// Handlebars templates replacing the built-in prompt
    pub system_template: Option<PathBuf>,
    pub request_template: Option<PathBuf>,
}

impl Default for AdvisorSection {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_ms: 120_000,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            excerpt_bytes: 8 * 1024,
            max_file_bytes: 32 * 1024,
            system_template: None,
            request_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub max_retries: u32,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutSection {
    /// Where `--repo` clones land
    pub clone_base: PathBuf,
}

impl Default for CheckoutSection {
    fn default() -> Self {
        Self {
            clone_base: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("buildfixer")
                .join("checkouts"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            build: BuildSection::default(),
            advisor: AdvisorSection::default(),
            run: RunSection::default(),
            checkout: CheckoutSection::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        let mut candidates = vec![PathBuf::from(format!("{}.yml", project_name))];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(project_name).join(format!("{}.yml", project_name)));
        }

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => log::warn!("Failed to load config from {}: {}", candidate.display(), e),
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject values no run could work with
    pub fn validate(&self) -> Result<()> {
        if self.build.timeout_ms == 0 {
            bail!("build.timeout_ms must be greater than 0");
        }
        if self.build.max_output_bytes == 0 {
            bail!("build.max_output_bytes must be greater than 0");
        }
        if self.build.property_file.as_os_str().is_empty() || self.build.property_file.is_absolute() {
            bail!("build.property_file must be a path relative to the checkout");
        }
        if self.build.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            bail!("build.command must not be empty");
        }
        if self.advisor.provider != "anthropic" {
            bail!("Unknown advisor provider '{}'", self.advisor.provider);
        }
        if self.advisor.max_tokens == 0 {
            bail!("advisor.max_tokens must be greater than 0");
        }
        if self.advisor.timeout_ms == 0 {
            bail!("advisor.timeout_ms must be greater than 0");
        }
        if self.advisor.excerpt_bytes == 0 || self.advisor.max_file_bytes == 0 {
            bail!("advisor.excerpt_bytes and advisor.max_file_bytes must be greater than 0");
        }
        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build.timeout_ms)
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_millis(self.advisor.timeout_ms)
    }

    /// Orchestrator settings, with an optional command override from the CLI
    pub fn orchestrator(&self, command_override: Option<&str>) -> OrchestratorConfig {
        OrchestratorConfig {
            build_command: BuildCommand::from_config(command_override.or(self.build.command.as_deref())),
            max_output_bytes: self.build.max_output_bytes,
            excerpt_bytes: self.advisor.excerpt_bytes,
            max_file_bytes: self.advisor.max_file_bytes,
        }
    }

    pub fn anthropic(&self) -> AnthropicConfig {
        AnthropicConfig {
            model: self.advisor.model.clone(),
            max_tokens: self.advisor.max_tokens,
            timeout: self.advisor_timeout(),
            api_key_env: self.advisor.api_key_env.clone(),
        }
    }
}
