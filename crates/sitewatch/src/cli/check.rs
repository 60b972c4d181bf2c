use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use sitewatch_core::{Check, CheckReport};

use super::{load_settings, open_store, print_events};

pub async fn run(db: &Path, configs: &[PathBuf]) -> Result<()> {
    let mut failed = 0;

    for path in configs {
        let settings = load_settings(path).await?;
        let name = settings.name.clone();
        tracing::debug!(check = %name, path = %path.display(), "Running check");
        let store = open_store(db, &name).await?;

        let report = Check::new(settings, store)?.run().await?;
        print_events(&report.events)?;
        print_summary(&name, &report);
        failed += report.failure_count();
    }

    if failed > 0 {
        bail!("{failed} document(s) failed");
    }
    Ok(())
}

pub(crate) fn print_summary(name: &str, report: &CheckReport) {
    eprintln!(
        "{name}: {} new, {} unchanged, {} document(s) in {}ms",
        report.event_count(),
        report.duplicates,
        report.documents,
        report.duration_ms
    );
    for (source, error) in &report.failures {
        eprintln!("  {source}: {error}");
    }
}
