use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection and sampling settings for one OpenAI-compatible model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub api_endpoint: String,
    pub env_var_api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u16,
    pub rate_limit_rps: f64,
}

/// Model used by the agent under test
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// OpenAI API endpoint
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Model to use for answering questions
    pub model: String,
    #[serde(default = "default_agent_temperature")]
    pub temperature: f64,
    #[serde(default = "default_agent_max_tokens")]
    pub max_tokens: u16,
    /// Rate limit for API requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl AgentConfig {
    pub fn settings(&self) -> ModelSettings {
        ModelSettings {
            api_endpoint: self.api_endpoint.clone(),
            env_var_api_key: self.env_var_api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            rate_limit_rps: self.rate_limit_rps,
        }
    }
}

/// Optional correctness judge
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JudgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_judge_max_tokens")]
    pub max_tokens: u16,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    /// Grading instructions prepended to every judge prompt
    #[serde(default = "default_rubric")]
    pub rubric: String,
}

impl JudgeConfig {
    pub fn settings(&self) -> ModelSettings {
        ModelSettings {
            api_endpoint: self.api_endpoint.clone(),
            env_var_api_key: self.env_var_api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            rate_limit_rps: self.rate_limit_rps,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_endpoint: default_api_endpoint(),
            env_var_api_key: default_env_var_api_key(),
            model: default_judge_model(),
            temperature: 0.0,
            max_tokens: default_judge_max_tokens(),
            rate_limit_rps: default_rate_limit(),
            rubric: default_rubric(),
        }
    }
}

fn default_api_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_agent_temperature() -> f64 {
    0.2
}

fn default_agent_max_tokens() -> u16 {
    1024
}

fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_judge_max_tokens() -> u16 {
    256
}

fn default_rate_limit() -> f64 {
    10.0
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer the user's question concisely.".to_string()
}

fn default_rubric() -> String {
    "Judge on factual correctness and groundedness only. Output pass/fail and rationale.".to_string()
}

fn default_version() -> String {
    "v001".to_string()
}

fn default_max_workers() -> usize {
    8
}

fn default_progress_every() -> usize {
    10
}

/// Root configuration for a single evaluation run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Agent version to evaluate (key into the agent registry)
    #[serde(default = "default_version")]
    pub version: String,
    /// Dataset files, evaluated in order as one run
    #[serde(default)]
    pub datasets: Vec<PathBuf>,
    /// Upper bound on concurrent agent invocations
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Log progress after this many completed items
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    #[serde(default)]
    pub run_name: Option<String>,
    /// Directory for metrics, results and prompt artifacts
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    pub agent: AgentConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_workers >= 1, "max_workers must be at least 1");
        ensure!(self.progress_every >= 1, "progress_every must be at least 1");
        Ok(())
    }

    pub fn effective_run_name(&self) -> String {
        match &self.run_name {
            Some(name) => name.clone(),
            None => format!("eval-{}", self.version),
        }
    }
}
