use std::path::Path;

use pl_core::config::Config;
use pl_core::types::short_sha;

/// Run the `status` subcommand: print the decoded state of one change
/// request for an operator. Read-only.
pub async fn run(config: &Config, repo_path: &Path, pr: u64) -> anyhow::Result<()> {
    let orchestrator = super::build_orchestrator(config, repo_path)?;
    let report = orchestrator.report(pr).await?;

    let change = &report.change;
    println!("pull request #{}  ({})", change.pr_number, change.head_branch);
    println!("{}", "-".repeat(40));
    if let Some(issue) = change.issue_number {
        println!("Issue:        #{issue}");
    }
    println!("Status:       {}", change.status);
    println!("Iteration:    {}", change.iteration);
    if report.dirty {
        println!("Labels:       inconsistent, decoded by precedence");
    }
    match &report.last_commit {
        Some(commit) => println!("Last commit:  {}", short_sha(&commit.sha)),
        None => println!("Last commit:  (none recorded)"),
    }
    if report.reviews.is_empty() {
        println!("Reviews:      (none recorded)");
    } else {
        println!("Reviews:");
        for (i, review) in report.reviews.iter().enumerate() {
            let verdict = if review.fixes.is_empty() {
                "approved".to_string()
            } else {
                format!("{} fix item(s)", review.fixes.len())
            };
            println!("  cycle {}: {} at {}", i + 1, verdict, short_sha(&review.sha));
            for fix in &review.fixes {
                println!("    - {fix}");
            }
        }
    }
    Ok(())
}
