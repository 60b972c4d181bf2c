use std::path::Path;

use anyhow::Result;
use sitewatch_core::EventStore;

use super::{load_settings, open_store, print_events};

pub async fn run(db: &Path, config: &Path, limit: usize) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(db, &settings.name).await?;

    let events = store.recent_events(limit).await?;
    print_events(&events)?;
    Ok(())
}
