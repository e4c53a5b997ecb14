use std::path::Path;

use pl_agents::orchestrator::Event;
use pl_core::config::Config;

/// Run the `issue` subcommand: open a change request for the issue and
/// run the first generation cycle.
pub async fn run(config: &Config, repo_path: &Path, number: u64) -> anyhow::Result<()> {
    let orchestrator = super::build_orchestrator(config, repo_path)?;
    let status = orchestrator
        .handle_event(Event::IssueOpened { issue: number })
        .await?;
    println!("issue #{number}: {status}");
    Ok(())
}
