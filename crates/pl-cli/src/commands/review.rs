use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

use pl_agents::orchestrator::Event;
use pl_core::config::Config;
use pl_core::types::{CiOutcome, CiReportEntry};

/// Run the `review` subcommand: fold a finished CI run into the loop
/// and let the reviewer judge the change.
pub async fn run(
    config: &Config,
    repo_path: &Path,
    pr: u64,
    sha: &str,
    ci_report: Option<&Path>,
) -> anyhow::Result<()> {
    let outcome = match ci_report {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading ci report {}", path.display()))?;
            parse_report(sha, &raw)?
        }
        None => CiOutcome::new(sha, Vec::new()),
    };

    let orchestrator = super::build_orchestrator(config, repo_path)?;
    let status = orchestrator
        .handle_event(Event::CiCompleted { pr, outcome })
        .await?;
    println!("pr #{pr}: {status}");
    Ok(())
}

/// The report is the map the CI workflow writes: check name to
/// `{ "exit_code": N, "log_tail": "..." }`.
fn parse_report(sha: &str, raw: &str) -> anyhow::Result<CiOutcome> {
    let report: BTreeMap<String, CiReportEntry> =
        serde_json::from_str(raw).context("parsing ci report")?;
    Ok(CiOutcome::from_report(sha, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_files_parse_into_outcomes() {
        let raw = r#"{
            "build": { "exit_code": 0 },
            "test": { "exit_code": 1, "log_tail": "assertion failed" }
        }"#;
        let outcome = parse_report(&"a".repeat(40), raw).unwrap();
        assert!(!outcome.passed());
        assert_eq!(outcome.failing().len(), 1);
        assert_eq!(outcome.failing()[0].name, "test");
    }

    #[test]
    fn garbage_reports_are_rejected() {
        assert!(parse_report("sha", "not json").is_err());
    }
}
