//! migratorctl - CLI client for migratord
//!
//! Starts migrations and polls their output over the daemon's HTTP API.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod client;
mod render;

use std::time::Duration;

use clap::{Parser, Subcommand};
use client::{Client, ClientError, GithubTokens};
use migrator_core::RunParams;

/// CLI client for the migratord daemon.
#[derive(Parser)]
#[command(name = "migratorctl")]
#[command(about = "Start GitHub migrations and follow their output")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:8080)
    #[arg(long, global = true, env = "MIGRATORD_ADDR")]
    addr: Option<String>,

    /// Auth token for daemon API
    #[arg(long, global = true, env = "MIGRATORD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Token for the source organization
    #[arg(long, global = true, env = "GH_SOURCE_PAT", hide_env_values = true)]
    source_token: Option<String>,

    /// Token for the target organization
    #[arg(long, global = true, env = "GH_PAT", hide_env_values = true)]
    target_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a migration
    Run {
        /// Organization to migrate from
        #[arg(long)]
        source_org: String,

        /// Organization to migrate into
        #[arg(long)]
        target_org: String,

        /// Migrate only this repository (default: every repository)
        #[arg(long)]
        repo: Option<String>,

        /// API base URL of a GitHub Enterprise Server source
        #[arg(long)]
        ghes_api_url: Option<String>,

        /// Poll output until the run finishes
        #[arg(short, long)]
        follow: bool,

        /// Delay between polls when no output is pending
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Fetch output for a run
    Output {
        /// Run token printed by `run`
        token: String,

        /// Poll until the run finishes
        #[arg(short, long)]
        follow: bool,

        /// Delay between polls when no output is pending
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Show daemon health and credential status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let addr = cli
        .addr
        .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
    let github = GithubTokens {
        source: cli.source_token,
        target: cli.target_token,
    };
    let client = Client::new(&addr, cli.token.as_deref(), github);

    if let Err(e) = client.wait_for_ready().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::Run {
            source_org,
            target_org,
            repo,
            ghes_api_url,
            follow,
            interval_ms,
        } => {
            let params = RunParams {
                source_org,
                source_repo: repo,
                target_org,
                ghes_api_url,
            };
            run_start(&client, &params, follow, interval_ms).await
        }
        Command::Output {
            token,
            follow,
            interval_ms,
        } => run_output(&client, &token, follow, interval_ms).await,
        Command::Status => run_status(&client).await,
    };

    if let Err(e) = result {
        if let ClientError::ScriptGenerationFailed { output, .. } = &e {
            render::print_generation_output(output);
        }
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run_start(
    client: &Client,
    params: &RunParams,
    follow: bool,
    interval_ms: u64,
) -> Result<(), ClientError> {
    let ticket = client.start_run(params).await?;
    if !follow {
        render::print_run_started(&ticket);
        return Ok(());
    }

    eprint!("{}", render::format_run_started(&ticket));
    follow_output(client, ticket.token.as_str(), interval_ms).await
}

async fn run_output(
    client: &Client,
    token: &str,
    follow: bool,
    interval_ms: u64,
) -> Result<(), ClientError> {
    if follow {
        return follow_output(client, token, interval_ms).await;
    }

    let chunk = client.poll_output(token).await?;
    render::print_lines(&chunk.lines);
    if chunk.done {
        eprintln!("run finished");
    }
    Ok(())
}

async fn follow_output(client: &Client, token: &str, interval_ms: u64) -> Result<(), ClientError> {
    let total = client
        .follow_output(token, Duration::from_millis(interval_ms), |chunk| {
            render::print_lines(&chunk.lines);
        })
        .await?;
    eprintln!("run finished ({total} lines)");
    Ok(())
}

async fn run_status(client: &Client) -> Result<(), ClientError> {
    let health = client.health().await?;
    let credentials = client.credential_status().await?;
    render::print_status(client.addr(), &health, &credentials);
    Ok(())
}
