use std::path::PathBuf;

use anyhow::Result;

use super::load_settings;

pub async fn run(configs: &[PathBuf]) -> Result<()> {
    for path in configs {
        let settings = load_settings(path).await?;
        eprintln!(
            "{}: ok ({}, {} rule(s), mode {})",
            settings.name,
            settings.schema.doc_type,
            settings.schema.rules.len(),
            settings.mode
        );
    }
    Ok(())
}
