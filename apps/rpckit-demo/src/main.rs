mod config;
mod demo;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::demo::Demo;

/// Demo host: exports a calculator service and calls it through a reference
#[derive(Parser)]
#[command(name = "rpckit-demo")]
#[command(about = "RpcKit demo host - exports a calculator service and calls it through a reference")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the service, call it, and serve until Ctrl-C
    Run {
        /// Unexport and exit after the first round of calls
        #[arg(long)]
        once: bool,
    },
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // defaults -> YAML (if provided) -> env (RPCKIT__*) -> CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(cli.verbose);

    logging::init(&config.logging);

    if cli.print_config {
        println!("Effective configuration:\n{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run { once: false }) {
        Commands::Run { once } => run(&config, once).await,
        Commands::Check => check(&config),
    }
}

fn check(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    config.validate()?;
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

async fn run(config: &AppConfig, once: bool) -> Result<()> {
    config.validate()?;
    let demo = Demo::new(config);
    let client = demo.start()?;

    let outcome = match demo::exercise(&client) {
        Ok(()) if once => Ok(()),
        Ok(()) => {
            tracing::info!("serving; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.map_err(anyhow::Error::from)
        }
        Err(e) => Err(e),
    };

    let report = demo.stop();
    tracing::info!(
        unregistered = report.unregistered,
        released = report.released,
        failures = report.failures.len(),
        "service unexported"
    );
    for failure in &report.failures {
        tracing::warn!(target_address = %failure.target, error = %failure.error, "unexport step failed");
    }
    outcome
}
