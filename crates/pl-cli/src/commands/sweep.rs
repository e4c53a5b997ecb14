use std::path::Path;

use pl_core::config::Config;

/// Run the `sweep` subcommand: stop managed change requests with no
/// activity past the configured staleness budget.
pub async fn run(config: &Config, repo_path: &Path) -> anyhow::Result<()> {
    let orchestrator = super::build_orchestrator(config, repo_path)?;
    let outcome = orchestrator.sweep().await?;

    println!("examined {} open pull request(s)", outcome.examined);
    for pr in &outcome.stopped {
        println!("  stopped #{pr}");
    }
    if outcome.skipped_conflicts > 0 {
        println!("  skipped {} (labels moved mid-sweep)", outcome.skipped_conflicts);
    }
    Ok(())
}
