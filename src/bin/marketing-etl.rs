//! Marketing ETL command line
//!
//! Run with: `cargo run --bin marketing-etl -- run`
//!
//! Configuration comes from the environment, optionally seeded from a `.env`
//! file. Set `RUST_LOG` to control the log level (default: info).

use clap::{Parser, Subcommand};
use marketing_etl::{DailySchedule, Extractor, Pipeline, PipelineConfig, PipelineDag};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "marketing-etl", version, about = "Join game activity onto campaign clicks and load the summary")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once
    Run {
        /// Execute through the task graph with per-task retries
        #[arg(long)]
        dag: bool,
        /// Keep running the task graph every day at 00:00 UTC
        #[arg(long)]
        daily: bool,
    },
    /// Download the remote endpoint into the landing directory
    Fetch {
        /// Endpoint URL (default: FETCH_ENDPOINT)
        #[arg(long)]
        endpoint: Option<String>,
        /// Landing directory (default: LANDING_DIR)
        #[arg(long)]
        landing_dir: Option<PathBuf>,
    },
    /// Serve the summary viewer over HTTP
    Serve {
        /// Bind host (default: VIEWER_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (default: VIEWER_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the pipeline task graph as JSON
    Graph,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "marketing-etl failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig::from_env()?;

    match command {
        Command::Run { dag, daily } => {
            info!(database = %config.database, "Starting pipeline");
            let pipeline = Pipeline::from_config(&config)?;
            if daily {
                pipeline.run_daily(&DailySchedule::default()).await;
            } else if dag {
                pipeline.run_dag().await?;
            } else {
                pipeline.run().await?;
            }
        }
        Command::Fetch { endpoint, landing_dir } => {
            let endpoint = endpoint
                .or(config.remote.endpoint)
                .ok_or("no endpoint given and FETCH_ENDPOINT is not set")?;
            let landing_dir = landing_dir.unwrap_or(config.remote.landing_dir);

            let extractor = Extractor::with_config(config.extractor)?;
            let path = extractor.fetch_to_landing(&endpoint, &landing_dir).await?;
            println!("{}", path.display());
        }
        Command::Serve { host, port } => {
            let mut server_config = config.server_config();
            if let Some(host) = host {
                server_config.host = host;
            }
            if let Some(port) = port {
                server_config.port = port;
            }
            let graph = PipelineDag::marketing(config.retry)?.to_view(&DailySchedule::default())?;
            marketing_etl::run_server(server_config, graph).await?;
        }
        Command::Graph => {
            let graph = PipelineDag::marketing(config.retry)?.to_view(&DailySchedule::default())?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
    }

    Ok(())
}
