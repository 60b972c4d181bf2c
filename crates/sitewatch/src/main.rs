use anyhow::Result;
use clap::Parser;

use sitewatch::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = cli.db;

    match cli.command {
        Commands::Check { configs } => sitewatch::cli::check::run(&db, &configs).await,
        Commands::Receive { config } => sitewatch::cli::receive::run(&db, &config).await,
        Commands::Validate { configs } => sitewatch::cli::validate::run(&configs).await,
        Commands::Events { config, limit } => sitewatch::cli::events::run(&db, &config, limit).await,
        Commands::Purge { configs } => sitewatch::cli::purge::run(&db, &configs).await,
    }
}
