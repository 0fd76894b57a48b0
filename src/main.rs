use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lifeline::app::App;
use lifeline::config::Config;
use tokio::signal;
use tracing::{error, info};

/// Lifeline - emergency incident orchestration.
#[derive(Parser, Debug)]
#[command(name = "lifeline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the orchestrator (default)
    Run,
    /// Validate the configuration file and exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Some(Commands::CheckConfig) = cli.command {
        println!("configuration OK: {}", cli.config.display());
        return;
    }

    config.init_logging();
    info!("lifeline starting");

    tokio::select! {
        result = App::run(config) => {
            if let Err(e) = result {
                error!(error = %e, "Fatal error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("lifeline stopped");
}
