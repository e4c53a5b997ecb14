use std::path::Path;

use pl_agents::orchestrator::Event;
use pl_core::config::Config;

/// Run the `cancel` subcommand: force a managed change request to
/// failed, whatever it is doing.
pub async fn run(config: &Config, repo_path: &Path, pr: u64) -> anyhow::Result<()> {
    let orchestrator = super::build_orchestrator(config, repo_path)?;
    let status = orchestrator.handle_event(Event::Cancelled { pr }).await?;
    println!("pr #{pr}: {status}");
    Ok(())
}
