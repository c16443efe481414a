use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autoscraper")]
#[command(about = "Job-board scraping orchestration engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine: scheduler, worker pool, normalizer, and Control API.
    Serve {
        /// Path to a YAML config file. Falls back to defaults if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => autoscraper_engine::serve::run(config).await,
    }
}
