mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use olivia::config::OliviaConfig;

#[derive(Parser)]
#[command(name = "olivia", version, about = "Conversational WebSocket server with long-term memory")]
struct Cli {
    /// Path to config.toml (default: ~/.olivia/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the WebSocket server
    Serve,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Print database statistics and a health check
    Stats,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.olivia/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => OliviaConfig::load_from(path)?,
        None => OliviaConfig::load()?,
    };

    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => olivia::server::serve(config).await?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
        Command::Stats => cli::stats::stats(&config)?,
    }

    Ok(())
}
