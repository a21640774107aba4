use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use thesis_research_engine::{
    cli::{execute_command, JobCommands},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    providers::HttpMarketDataClient,
    storage::SqliteStorage,
    Orchestrator,
};

/// Research workflow engine for investment due-diligence.
#[derive(Parser, Debug)]
#[command(name = "thesis-research-engine", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run job workers until interrupted
    Worker {
        /// Drain the queue once and exit
        #[arg(long)]
        once: bool,
    },

    /// Create or update the Langbase pipes used by each generation phase
    EnsurePipes,

    #[command(flatten)]
    Jobs(JobCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Thesis research engine starting..."
    );

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c.with_pipes(config.pipes.clone())
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    if let Command::EnsurePipes = cli.command {
        info!("Ensuring Langbase pipes exist...");
        langbase.ensure_pipes().await?;
        println!("Pipes ready");
        return Ok(());
    }

    let mut orchestrator =
        Orchestrator::new(storage, Arc::new(langbase), config.orchestrator.clone());
    if let Some(market) = HttpMarketDataClient::from_config(&config.market_data, &config.request)? {
        info!(base_url = %market.base_url(), "Market data provider enabled");
        orchestrator = orchestrator.with_market_data(Arc::new(market));
    }

    match cli.command {
        Command::Worker { once: true } => {
            let mut processed = 0usize;
            while let Some(job) = orchestrator.run_once().await? {
                info!(job_id = %job.id, status = %job.status, "Job processed");
                processed += 1;
            }
            info!(processed, "Queue drained");
        }
        Command::Worker { once: false } => {
            let handles = orchestrator.start();
            info!("Workers running, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested, waiting for in-flight jobs...");
            orchestrator.shutdown();
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked");
                }
            }
            info!("Shutdown complete");
        }
        Command::Jobs(command) => {
            let result = execute_command(command, &orchestrator).await;
            if result.exit_code == 0 {
                println!("{}", result.message);
            } else {
                eprintln!("{}", result.message);
                std::process::exit(result.exit_code);
            }
        }
        Command::EnsurePipes => {}
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
