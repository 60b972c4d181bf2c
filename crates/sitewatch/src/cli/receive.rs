use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sitewatch_core::Check;
use tokio::io::AsyncReadExt;

use super::check::print_summary;
use super::{load_settings, open_store, print_events};

pub async fn run(db: &Path, config: &Path) -> Result<()> {
    let settings = load_settings(config).await?;
    let name = settings.name.clone();

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let incoming = match serde_json::from_str::<Value>(&input).context("Incoming event is not valid JSON")? {
        Value::Object(map) => map,
        _ => bail!("Incoming event must be a JSON object"),
    };

    let store = open_store(db, &name).await?;
    let report = Check::new(settings, store)?.receive(&incoming).await?;
    print_events(&report.events)?;
    print_summary(&name, &report);

    if report.failure_count() > 0 {
        bail!("{} document(s) failed", report.failure_count());
    }
    Ok(())
}
