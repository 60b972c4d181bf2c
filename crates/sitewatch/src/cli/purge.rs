use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use sitewatch_core::EventStore;

use super::{load_settings, open_store};

pub async fn run(db: &Path, configs: &[PathBuf]) -> Result<()> {
    let now = Utc::now();
    for path in configs {
        let settings = load_settings(path).await?;
        let store = open_store(db, &settings.name).await?;
        let purged = store.purge_expired(now).await?;
        eprintln!("{}: purged {purged} expired event(s)", settings.name);
    }
    Ok(())
}
