//! prgate - pull request gatekeeper CLI
//!
//! Validates commits against the configured validators and merges (or
//! reports a status) when every one of them passes.
//!
//! ## Commands
//!
//! - `validate`: run the validation pipeline against one commit
//! - `dispatch`: handle one webhook delivery read from a file or stdin
//! - `reconcile-hooks`: make the configured webhooks exist exactly once
//! - `trigger-build`: restart the latest CI build of a pull request
//! - `behind`, `contributors`, `commits`, `open-prs`, `statuses`,
//!   `rate-limit`: read-only repository queries
//!
//! Every command prints a single JSON document on stdout.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prgate_core::{
    init_tracing, CommitTarget, DispatchOutcome, EventDispatcher, EventState, OnSuccess, Paginated,
    RepositoryClient, Settings, SuccessMode, ValidationPipeline,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "prgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pull request gatekeeper", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "PRGATE_CONFIG", default_value = "prgate.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every validator against a commit and act on the verdict
    Validate {
        /// Commit SHA to validate
        sha: String,

        /// Author login (resolved from the commit when omitted)
        #[arg(long)]
        login: Option<String>,

        /// Bypass validators' memory of earlier rejections
        #[arg(long)]
        recheck: bool,

        /// Merge into this branch on success instead of following the
        /// configured success mode
        #[arg(long)]
        merge_into: Option<String>,
    },

    /// Handle one webhook delivery
    Dispatch {
        /// Event type, as sent in `X-GitHub-Event`
        #[arg(short, long)]
        event: String,

        /// Payload file (default: stdin)
        #[arg(short, long)]
        payload: Option<PathBuf>,

        /// `X-Hub-Signature-256` header of the delivery
        #[arg(long)]
        signature: Option<String>,
    },

    /// Reconcile the configured webhooks
    ReconcileHooks,

    /// Restart the most recent CI build of a pull request
    TriggerBuild {
        /// Pull request number
        pr: u64,
    },

    /// Show how far a commit is behind the default branch
    Behind {
        /// Commit SHA
        sha: String,
    },

    /// List repository contributors
    Contributors,

    /// List commits on the default branch
    Commits,

    /// List open pull requests
    OpenPrs,

    /// List commit statuses
    Statuses {
        /// Commit SHA
        sha: String,
    },

    /// Show the remaining API quota
    RateLimit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let client = connect(&cli.config)?;
    let output = run(cli.command, Arc::new(client)).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn connect(path: &Path) -> Result<RepositoryClient> {
    let settings = Settings::from_file(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    let config = settings
        .into_repository_config()
        .context("Invalid configuration")?;
    info!(
        repo = %format!("{}/{}", config.organization, config.repository),
        validators = config.validators.len(),
        "configuration loaded"
    );
    RepositoryClient::connect(config).context("Failed to build provider clients")
}

async fn run(command: Commands, client: Arc<RepositoryClient>) -> Result<Value> {
    match command {
        Commands::Validate {
            sha,
            login,
            recheck,
            merge_into,
        } => cmd_validate(client, sha, login, recheck, merge_into).await,
        Commands::Dispatch {
            event,
            payload,
            signature,
        } => cmd_dispatch(client, &event, payload.as_deref(), signature.as_deref()).await,
        Commands::ReconcileHooks => {
            let reports = client
                .reconcile_webhooks()
                .await
                .context("Webhook reconciliation failed")?;
            to_json(&reports)
        }
        Commands::TriggerBuild { pr } => {
            let restart = client
                .trigger_travis_for_pull_request(pr)
                .await
                .with_context(|| format!("Failed to restart build for #{}", pr))?;
            to_json(&restart)
        }
        Commands::Behind { sha } => {
            let status = client.is_behind_master(&sha).await?;
            to_json(&status)
        }
        Commands::Contributors => listing(client.get_contributors().await?),
        Commands::Commits => listing(client.get_commits().await?),
        Commands::OpenPrs => listing(client.get_all_open_pull_requests().await?),
        Commands::Statuses { sha } => to_json(&client.get_all_statuses_for(&sha).await?),
        Commands::RateLimit => to_json(&client.rate_limit().await?),
    }
}

async fn cmd_validate(
    client: Arc<RepositoryClient>,
    sha: String,
    login: Option<String>,
    recheck: bool,
    merge_into: Option<String>,
) -> Result<Value> {
    let on_success = match (merge_into, client.config().on_success) {
        (Some(base), _) => OnSuccess::Merge {
            head: sha.clone(),
            base,
        },
        (None, SuccessMode::Merge) => OnSuccess::Merge {
            head: sha.clone(),
            base: client.config().default_branch.clone(),
        },
        (None, SuccessMode::Status) => OnSuccess::ReportStatus,
    };

    let mut target = CommitTarget::new(sha);
    target.login = login;

    let report = ValidationPipeline::new(client)
        .perform_complete_validation(&target, recheck, &on_success)
        .await
        .with_context(|| format!("Validation of {} did not complete", target.sha))?;
    to_json(&report)
}

async fn cmd_dispatch(
    client: Arc<RepositoryClient>,
    event: &str,
    payload: Option<&Path>,
    signature: Option<&str>,
) -> Result<Value> {
    let body = match payload {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read payload {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read payload from stdin")?;
            buf
        }
    };

    let outcome = EventDispatcher::new(client)
        .dispatch_raw(event, &body, signature)
        .await
        .with_context(|| format!("Failed to handle {} event", event))?;

    to_json(&DispatchOutput {
        state: outcome.state(),
        outcome: &outcome,
    })
}

#[derive(Serialize)]
struct DispatchOutput<'a> {
    state: EventState,
    outcome: &'a DispatchOutcome,
}

#[derive(Serialize)]
struct ListingOutput<T> {
    complete: bool,
    pages: usize,
    interrupted: Option<String>,
    items: Vec<T>,
}

fn listing<T: Serialize>(page: Paginated<T>) -> Result<Value> {
    to_json(&ListingOutput {
        complete: page.is_complete(),
        pages: page.pages,
        interrupted: page.interrupted.as_ref().map(|e| e.to_string()),
        items: page.items,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize output")
}
