//! Configuration loading for the patch loop.
//!
//! Configuration is a single TOML file. A repo-local `patchloop.toml` wins
//! over the per-user file in `~/.patchloop/config.toml`; with neither
//! present every section falls back to its defaults. Secrets never live in
//! the file, only the names of the environment variables that hold them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Root configuration. Every section is optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Config {
    /// Repo-local config file name, looked up in the working directory.
    pub const LOCAL_FILE: &'static str = "patchloop.toml";

    /// The per-user config path, `~/.patchloop/config.toml`.
    pub fn user_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".patchloop").join("config.toml"))
    }

    /// Load from the first existing location, or defaults when no file
    /// exists anywhere.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(Self::LOCAL_FILE);
        if local.exists() {
            return Self::load_from(&local);
        }
        if let Some(path) = Self::user_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.llm.validate()?;
        self.agent.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// [github]
// ---------------------------------------------------------------------------

/// Host coordinates and the env var names that hold the tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Repository owner. Falls back to `GITHUB_OWNER` when empty.
    #[serde(default)]
    pub owner: String,
    /// Repository name. Falls back to `GITHUB_REPO` when empty.
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Env var holding the code agent's token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Env var holding the reviewer's token. The reviewer must act as a
    /// different user than the code agent, otherwise the host rejects the
    /// review as self-approval. Falls back to `token_env` when unset.
    #[serde(default)]
    pub reviewer_token_env: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            base_branch: default_base_branch(),
            token_env: default_token_env(),
            reviewer_token_env: None,
        }
    }
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

// ---------------------------------------------------------------------------
// [llm]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Provider name, `anthropic` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model for the reviewer, falling back to `model` when unset.
    #[serde(default)]
    pub reviewer_model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl LlmSettings {
    pub fn reviewer_model(&self) -> &str {
        self.reviewer_model.as_deref().unwrap_or(&self.model)
    }

    fn validate(&self) -> Result<()> {
        match self.provider.as_str() {
            "anthropic" | "openai" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "unknown llm provider '{other}' (expected 'anthropic' or 'openai')"
                )))
            }
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Validation("llm.max_tokens must be positive".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Validation(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            reviewer_model: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_temperature() -> f32 {
    0.2
}

// ---------------------------------------------------------------------------
// [agent]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Completed generate/review cycles before the loop gives up.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Total patch generation attempts per invocation, counting the first
    /// try. Covers both malformed output and apply conflicts.
    #[serde(default = "default_generation_attempts")]
    pub generation_attempts: u32,
    /// How many repository files the selection pre-pass may put into the
    /// generation prompt.
    #[serde(default = "default_max_context_files")]
    pub max_context_files: usize,
    /// Per-file byte cap for prompt context; longer files are truncated.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    /// Head branches are named `<prefix><issue-number>`.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// A managed PR with no activity for this long is swept to `failed`.
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
}

impl AgentSettings {
    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Validation("agent.max_iterations must be positive".into()));
        }
        if self.generation_attempts == 0 {
            return Err(ConfigError::Validation(
                "agent.generation_attempts must be positive".into(),
            ));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(ConfigError::Validation("agent.branch_prefix must not be empty".into()));
        }
        if self.stale_after_hours <= 0 {
            return Err(ConfigError::Validation(
                "agent.stale_after_hours must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            generation_attempts: default_generation_attempts(),
            max_context_files: default_max_context_files(),
            max_file_bytes: default_max_file_bytes(),
            branch_prefix: default_branch_prefix(),
            stale_after_hours: default_stale_after_hours(),
        }
    }
}

fn default_max_iterations() -> u32 {
    3
}

fn default_generation_attempts() -> u32 {
    2
}

fn default_max_context_files() -> usize {
    8
}

fn default_max_file_bytes() -> usize {
    16_000
}

fn default_branch_prefix() -> String {
    "agent/issue-".to_string()
}

fn default_stale_after_hours() -> i64 {
    48
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Resolves secrets from the environment using the variable names the
/// config declares. The values are read at call time and never stored.
pub struct Credentials;

impl Credentials {
    pub fn github_token(config: &Config) -> Result<String> {
        read_env(&config.github.token_env)
    }

    /// Reviewer token, falling back to the code agent token when no
    /// separate variable is configured.
    pub fn reviewer_token(config: &Config) -> Result<String> {
        match &config.github.reviewer_token_env {
            Some(var) => read_env(var),
            None => Self::github_token(config),
        }
    }

    pub fn llm_api_key(config: &Config) -> Result<String> {
        read_env(&config.llm.api_key_env)
    }
}

fn read_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(var.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.github.base_branch, "main");
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let raw = r#"
            [github]
            owner = "acme"
            repo = "widgets"

            [agent]
            max_iterations = 5
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.github.owner, "acme");
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.branch_prefix, "agent/issue-");
        assert_eq!(config.llm.provider, "anthropic");
    }

    #[test]
    fn load_from_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchloop.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = Config::load_from(Path::new("/nonexistent/patchloop.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn validation_rejects_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn validation_rejects_zero_iterations() {
        let mut config = Config::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reviewer_model_falls_back() {
        let mut settings = LlmSettings::default();
        assert_eq!(settings.reviewer_model(), settings.model);
        settings.reviewer_model = Some("gpt-4o".to_string());
        assert_eq!(settings.reviewer_model(), "gpt-4o");
    }

    #[test]
    fn credentials_report_the_missing_variable() {
        let mut config = Config::default();
        config.github.token_env = "PL_TEST_TOKEN_THAT_IS_NEVER_SET".to_string();
        let err = Credentials::github_token(&config).unwrap_err();
        assert!(err.to_string().contains("PL_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn reviewer_token_falls_back_to_agent_token_env() {
        let mut config = Config::default();
        config.github.token_env = "PL_TEST_FALLBACK_TOKEN_84F1".to_string();
        std::env::set_var("PL_TEST_FALLBACK_TOKEN_84F1", "tok-123");
        let token = Credentials::reviewer_token(&config).unwrap();
        assert_eq!(token, "tok-123");
        std::env::remove_var("PL_TEST_FALLBACK_TOKEN_84F1");
    }
}
