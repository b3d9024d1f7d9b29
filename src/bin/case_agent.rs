//! Example agent binary.
//!
//! Usage:
//!   case_agent --config agent.yaml
//!   case_agent --offline --iterations 3 --pool-size 4
//!
//! Environment:
//!   CASE_AGENT_API_URL, CASE_AGENT_CLIENT_ID, CASE_AGENT_SECRET, ...
//!   RUST_LOG (default: info,case_agent=debug)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use case_agent::remote::ProcessingMode;
use case_agent::{Agent, AgentConfig, HttpCaseClient, InMemoryCaseService};

#[derive(Parser, Debug)]
#[command(name = "case_agent")]
#[command(about = "Example agent for the case-management platform")]
struct Args {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "CASE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Run against an in-process service instead of the remote API
    #[arg(long)]
    offline: bool,

    /// Scenario iterations per worker
    #[arg(long, short = 'i')]
    iterations: Option<u32>,

    /// Number of workers
    #[arg(long, short = 'p')]
    pool_size: Option<usize>,

    /// Delete cases created by this agent before starting the workers
    #[arg(long)]
    cleanup: bool,

    /// Directory to pick upload files from
    #[arg(long)]
    files_path: Option<PathBuf>,
}

fn load_config(args: &Args) -> anyhow::Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::default(),
    }
    .apply_env()?;

    if let Some(iterations) = args.iterations {
        config = config.iterations(iterations);
    }
    if let Some(pool_size) = args.pool_size {
        config = config.pool_size(pool_size);
    }
    if args.cleanup {
        config = config.cleanup(true);
    }
    if args.files_path.is_some() {
        config = config.files_path(args.files_path.clone());
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,case_agent=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args).context("Loading configuration")?;

    tracing::info!(
        base_url = %config.api.base_url,
        offline = args.offline,
        iterations = config.example.iterations,
        pool_size = config.executor.pool_size,
        "Starting case agent"
    );

    let agent = if args.offline {
        let service = Arc::new(InMemoryCaseService::new().with_processing(
            ProcessingMode::Completes {
                after: Duration::from_secs(1),
            },
        ));
        Agent::new(config, service.clone(), service)
    } else {
        let client = Arc::new(HttpCaseClient::new(&config.api)?);
        Agent::new(config, client.clone(), client)
    };

    agent.run().await
}
