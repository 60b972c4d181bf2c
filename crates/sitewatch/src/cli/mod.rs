pub mod check;
pub mod events;
pub mod purge;
pub mod receive;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sitewatch_core::{CheckConfig, CheckSettings, RecentEvent, SqliteEventStore};

#[derive(Parser)]
#[command(
    name = "sitewatch",
    about = "Watch documents for new items and record them as events",
    version
)]
pub struct Cli {
    /// Event database path
    #[arg(long, global = true, env = "SITEWATCH_DB", default_value = "sitewatch.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run checks against their configured URLs
    Check {
        /// Check configuration file(s)
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
    /// Run a check for an incoming event read as JSON from stdin
    Receive {
        /// Check configuration file
        config: PathBuf,
    },
    /// Validate check configuration without fetching anything
    Validate {
        /// Check configuration file(s)
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
    /// Show the most recent events of a check
    Events {
        /// Check configuration file
        config: PathBuf,
        /// Maximum number of events to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete expired events
    Purge {
        /// Check configuration file(s)
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
}

pub(crate) async fn load_settings(path: &Path) -> Result<CheckSettings> {
    let config = CheckConfig::load(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid check {}", path.display()))
}

pub(crate) async fn open_store(db: &Path, check: &str) -> Result<Arc<SqliteEventStore>> {
    let store = SqliteEventStore::open(&db.to_string_lossy(), check)
        .await
        .with_context(|| format!("Failed to open event database {}", db.display()))?;
    Ok(Arc::new(store))
}

/// One JSON line per event on stdout.
pub(crate) fn print_events(events: &[RecentEvent]) -> Result<()> {
    for event in events {
        println!("{}", serde_json::to_string(&event.payload)?);
    }
    Ok(())
}
