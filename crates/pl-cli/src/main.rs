mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// patchloop CLI -- drive the generate / verify / review loop on a
/// GitHub repository. Each invocation handles exactly one event and
/// exits; state lives on the pull request itself.
#[derive(Parser)]
#[command(name = "pl", version, about)]
struct Cli {
    /// Config file (defaults to ./patchloop.toml, then
    /// ~/.patchloop/config.toml; PATCHLOOP_CONFIG overrides the chain).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Working tree the code agent edits (defaults to $GITHUB_WORKSPACE
    /// on CI runners, then the current directory).
    #[arg(long, global = true)]
    repo_path: Option<PathBuf>,

    /// Emit JSON logs instead of human-readable ones.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a change request for an issue and run the first cycle.
    Issue {
        /// Issue number to work on.
        #[arg(long)]
        number: u64,
    },

    /// Run the next fix cycle for a change whose review requested one.
    Fix {
        /// Pull request number.
        #[arg(long)]
        pr: u64,
    },

    /// Feed a finished CI run into the loop and review the change.
    Review {
        /// Pull request number.
        #[arg(long)]
        pr: u64,
        /// Commit the CI run checked out.
        #[arg(long)]
        sha: String,
        /// JSON report mapping check names to exit codes and log tails.
        /// Omitting it means no checks ran, which counts as green.
        #[arg(long)]
        ci_report: Option<PathBuf>,
    },

    /// Cancel a managed change request.
    Cancel {
        /// Pull request number.
        #[arg(long)]
        pr: u64,
    },

    /// Stop managed change requests that have been idle too long.
    Sweep,

    /// Show the decoded state of a change request.
    Status {
        /// Pull request number.
        #[arg(long)]
        pr: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.log_json {
        pl_telemetry::init_logging_json("pl", "info");
    } else {
        pl_telemetry::init_logging("pl", "info");
    }

    let config = commands::load_config(cli.config.as_deref())?;
    let repo_path = commands::resolve_repo_path(cli.repo_path);

    match cli.command {
        Commands::Issue { number } => commands::issue::run(&config, &repo_path, number).await,
        Commands::Fix { pr } => commands::fix::run(&config, &repo_path, pr).await,
        Commands::Review { pr, sha, ci_report } => {
            commands::review::run(&config, &repo_path, pr, &sha, ci_report.as_deref()).await
        }
        Commands::Cancel { pr } => commands::cancel::run(&config, &repo_path, pr).await,
        Commands::Sweep => commands::sweep::run(&config, &repo_path).await,
        Commands::Status { pr } => commands::status::run(&config, &repo_path, pr).await,
    }
}
