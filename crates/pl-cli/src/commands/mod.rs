pub mod cancel;
pub mod fix;
pub mod issue;
pub mod review;
pub mod status;
pub mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use pl_agents::code_agent::CodeAgent;
use pl_agents::orchestrator::Orchestrator;
use pl_agents::reviewer::Reviewer;
use pl_agents::workspace::GitWorkspace;
use pl_core::config::{Config, Credentials};
use pl_core::repo::RepoPath;
use pl_integrations::github::GitHubClient;
use pl_integrations::host::{ChangeHost, GitHubHost};
use pl_intelligence::llm::{provider_for, LlmConfig, LlmProvider};

/// Load the config from `--config`, `PATCHLOOP_CONFIG`, or the default
/// lookup chain.
pub fn load_config(flag: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = flag {
        tracing::debug!(path = %path.display(), "loading config from --config");
        return Config::load_from(path).with_context(|| format!("loading {}", path.display()));
    }
    if let Ok(env_path) = std::env::var("PATCHLOOP_CONFIG") {
        let path = Path::new(&env_path);
        tracing::debug!(path = %path.display(), "loading config from PATCHLOOP_CONFIG");
        return Config::load_from(path).with_context(|| format!("loading {}", path.display()));
    }
    Ok(Config::load()?)
}

/// The working tree: `--repo-path`, else `GITHUB_WORKSPACE` (set by CI
/// runners around the checkout), else the current directory.
pub fn resolve_repo_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os("GITHUB_WORKSPACE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// One wiring path for every subcommand: host client(s), git workspace,
/// both model roles, orchestrator. Credentials are read from the env
/// vars the config names, never from the file itself.
pub(crate) fn build_orchestrator(config: &Config, repo_path: &Path) -> anyhow::Result<Orchestrator> {
    let (owner, repo) = coordinates(config)?;

    let token = Credentials::github_token(config)?;
    let mut host = GitHubHost::new(GitHubClient::new(token, &owner, &repo)?);
    if config.github.reviewer_token_env.is_some() {
        let reviewer_token = Credentials::reviewer_token(config)?;
        host = host.with_reviewer(GitHubClient::new(reviewer_token, &owner, &repo)?);
    }
    let host: Arc<dyn ChangeHost> = Arc::new(host);

    let repo = RepoPath::from_workdir(repo_path)
        .with_context(|| format!("opening repository at {}", repo_path.display()))?;
    let workspace = Arc::new(GitWorkspace::new(repo));

    let api_key = Credentials::llm_api_key(config)?;
    let provider: Arc<dyn LlmProvider> = Arc::from(provider_for(&config.llm.provider, api_key)?);

    let code_agent = CodeAgent::new(
        provider.clone(),
        workspace,
        LlmConfig {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        },
        config.agent.clone(),
    );
    let reviewer = Reviewer::new(
        provider,
        LlmConfig {
            model: config.llm.reviewer_model().to_string(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        },
    );

    Ok(Orchestrator::new(
        host,
        code_agent,
        reviewer,
        config.agent.clone(),
        config.github.base_branch.clone(),
    ))
}

fn coordinates(config: &Config) -> anyhow::Result<(String, String)> {
    let owner = coordinate(&config.github.owner, "GITHUB_OWNER", "github.owner")?;
    let repo = coordinate(&config.github.repo, "GITHUB_REPO", "github.repo")?;
    Ok((owner, repo))
}

fn coordinate(configured: &str, env_var: &str, key: &str) -> anyhow::Result<String> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }
    std::env::var(env_var).map_err(|_| anyhow::anyhow!("{key} is not configured and {env_var} is unset"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_prefers_the_config_value() {
        let got = coordinate("acme", "PL_TEST_NO_SUCH_VAR", "github.owner").unwrap();
        assert_eq!(got, "acme");
    }

    #[test]
    fn coordinate_reports_the_missing_env_var() {
        let err = coordinate("", "PL_TEST_NO_SUCH_VAR", "github.owner").unwrap_err();
        assert!(err.to_string().contains("PL_TEST_NO_SUCH_VAR"));
    }

    #[test]
    fn repo_path_flag_beats_the_environment() {
        let got = resolve_repo_path(Some(PathBuf::from("/work/checkout")));
        assert_eq!(got, PathBuf::from("/work/checkout"));
    }

    #[test]
    fn explicit_config_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchloop.toml");
        std::fs::write(
            &path,
            "[github]\nowner = \"acme\"\nrepo = \"widgets\"\n\n[agent]\nmax_iterations = 5\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.github.owner, "acme");
        assert_eq!(config.github.repo, "widgets");
        assert_eq!(config.agent.max_iterations, 5);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config(Some(Path::new("/no/such/patchloop.toml"))).unwrap_err();
        assert!(err.to_string().contains("patchloop.toml"));
    }
}
