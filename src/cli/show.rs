use super::{open_backend, open_stores};
use crate::config::Config;
use crate::error::Result;
use clap::Subcommand;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum ShowResource {
    /// Show configuration, data and cache paths
    Paths,
    /// Show record counts per collection and whether cloud sync is configured
    Status,
}

impl ShowResource {
    pub async fn execute(&self) -> Result<()> {
        match self {
            ShowResource::Paths => show_paths(),
            ShowResource::Status => show_status().await,
        }
    }
}

fn show_paths() -> Result<()> {
    let config = Config::load()?;
    let config_path = Config::config_file()?;
    let data_dir = config.data_dir()?;
    let cache_dir = Config::cache_dir()?;

    info!(path = ?config_path, "Config path");
    info!(path = ?data_dir, "Data path");
    info!(path = ?cache_dir, "Cache path");

    Ok(())
}

async fn show_status() -> Result<()> {
    let config = Config::load()?;
    let stores = open_stores(&config, open_backend(&config)?);
    stores.ready().await;

    for store in stores.iter() {
        info!(collection = %store.key(), records = store.value().len(), "Local data");
    }
    info!(
        configured = config.google.is_configured(),
        durability = ?config.sync.durability,
        "Cloud sync"
    );

    Ok(())
}
