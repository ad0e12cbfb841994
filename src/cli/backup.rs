use super::{open_backend, open_stores};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::snapshot::SnapshotAggregator;
use dialoguer::Confirm;
use std::path::Path;
use tracing::info;

pub async fn export(file: &Path) -> Result<()> {
    let config = Config::load()?;
    let aggregator = SnapshotAggregator::new(open_stores(&config, open_backend(&config)?));

    let snapshot = aggregator.export(file).await?;

    info!(path = ?file, records = snapshot.record_count(), "Export completed");
    Ok(())
}

pub async fn import(file: &Path, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Replace local data with the contents of {}?",
                file.display()
            ))
            .default(false)
            .interact()
            .map_err(|e| AppError::Other(e.into()))?;
        if !confirmed {
            info!("Import cancelled");
            return Ok(());
        }
    }

    let config = Config::load()?;
    let aggregator = SnapshotAggregator::new(open_stores(&config, open_backend(&config)?));
    let restored = aggregator.import(file).await?;

    info!(path = ?file, collections = restored, "Import completed");
    Ok(())
}
