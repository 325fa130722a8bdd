mod config;
mod load;
mod rankings;
mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};
use load::Load;
use rankings::Rankings;
use tracing_subscriber::EnvFilter;
use watch::Watch;

#[derive(Debug, Parser)]
#[command(name = "tonearm")]
#[command(about = "A command-line tool to inspect a pool of audio nodes through the Tonearm gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Stream node and player events")]
    Watch(Watch),

    #[command(about = "Show node penalties, lowest first")]
    Rankings(Rankings),

    #[command(about = "Resolve an identifier on the best node of a pool")]
    Load(Load),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tonearm_client=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch(watch) => watch::handle_watch(watch).await?,
        Commands::Rankings(rankings) => rankings::handle_rankings(rankings).await?,
        Commands::Load(load) => load::handle_load(load).await?,
    }

    Ok(())
}
