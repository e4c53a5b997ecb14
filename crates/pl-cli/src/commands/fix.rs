use std::path::Path;

use pl_agents::orchestrator::Event;
use pl_core::config::Config;

/// Run the `fix` subcommand: the scheduling tick for a change whose
/// review requested fixes. Claims the next iteration and regenerates.
pub async fn run(config: &Config, repo_path: &Path, pr: u64) -> anyhow::Result<()> {
    let orchestrator = super::build_orchestrator(config, repo_path)?;
    let status = orchestrator.handle_event(Event::FixRequested { pr }).await?;
    println!("pr #{pr}: {status}");
    Ok(())
}
