//! stampede command line interface

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stampede_core::{
    resolve_github_token, CliValues, ConfigFile, GitVcs, RepoDirectory, Runner, RunnerOptions,
    WctRunner,
};
use stampede_github::GitHubClient;

/// Clone a set of GitHub repositories and run their test suites
#[derive(Debug, Parser)]
#[command(name = "stampede", version, about)]
struct Cli {
    /// Repo to make available in the workspace, as owner/repo[#ref]; `*`
    /// wildcards match repo names. Repeatable
    #[arg(short = 'r', long = "repo")]
    repo: Vec<String>,

    /// Repo whose tests should run; implies --repo for it. Repeatable
    #[arg(short = 't', long = "test")]
    test: Vec<String>,

    /// Pattern removing repos from the workspace. Repeatable
    #[arg(short = 'e', long = "exclude-repo")]
    exclude_repo: Vec<String>,

    /// Pattern removing repos from the test set. Repeatable
    #[arg(short = 's', long = "skip-test")]
    skip_test: Vec<String>,

    /// Path to the JSON config file
    #[arg(short = 'c', long, default_value = "stampede_config.json")]
    config_file: PathBuf,

    /// GitHub API token; overrides config file, GITHUB_TOKEN and the
    /// github-token file
    #[arg(short = 'g', long)]
    github_token: Option<String>,

    /// Delete the entire workspace before cloning
    #[arg(short = 'f', long)]
    fresh: bool,

    /// Check out each repo's highest release tag instead of its ref
    #[arg(short = 'l', long)]
    latest_release: bool,

    /// Report skipped repos as well as failures
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Flags passed through to wct; replaces the default set
    #[arg(short = 'w', long = "wct-flags", num_args = 1..)]
    wct_flags: Option<Vec<String>>,

    /// Directory to clone repos under
    #[arg(short = 'd', long)]
    workspace_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let file = ConfigFile::load(&cli.config_file)
        .with_context(|| format!("loading {}", cli.config_file.display()))?;
    let token = resolve_github_token(cli.github_token.as_deref(), &file)?;

    let options = RunnerOptions::merge(
        &CliValues {
            require: cli.repo,
            test: cli.test,
            exclude: cli.exclude_repo,
            skip: cli.skip_test,
            fresh: cli.fresh,
            latest_release: cli.latest_release,
            verbose: cli.verbose,
            wct_flags: cli.wct_flags,
            workspace_dir: cli.workspace_dir,
        },
        &file,
    );
    if options.require.is_empty() && options.test.is_empty() {
        anyhow::bail!("nothing to do: pass --repo or --test, or set them in the config file");
    }

    let github = GitHubClient::new(token.clone()).context("initializing GitHub client")?;
    if token.is_some() {
        match github.current_user().await {
            Ok(login) => info!(%login, "authenticated to GitHub"),
            Err(e) => warn!(error = %e, "GitHub token did not validate, continuing anyway"),
        }
    }

    let directory: Arc<dyn RepoDirectory> = Arc::new(github);
    let runner = Runner::new(
        options,
        directory,
        Arc::new(GitVcs::new(token)),
        Arc::new(WctRunner),
    );

    let summary = runner.run().await?;
    if summary.failed > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
