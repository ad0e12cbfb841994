mod backup;
mod show;
mod sync;

use crate::auth::{CloudAuthClient, GoogleIdentity};
use crate::config::Config;
use crate::drive::DriveConnector;
use crate::error::Result;
use crate::notify::Notifications;
use crate::store::{ChangeBus, CollectionStores, FsBackend};
use crate::sync::SyncCoordinator;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

pub use show::ShowResource;

#[derive(Parser, Debug)]
#[command(name = "finance-sync")]
#[command(about = "Local-first finance data with Google Drive backup", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Show { resource } => resource.execute().await,
            Commands::Push(sign_in) => sync::push(sign_in).await,
            Commands::Pull(sign_in) => sync::pull(sign_in).await,
            Commands::Watch(sign_in) => sync::watch(sign_in).await,
            Commands::Export { file } => backup::export(file).await,
            Commands::Import { file, yes } => backup::import(file, *yes).await,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Show {
        #[command(subcommand)]
        resource: ShowResource,
    },
    /// Sign in and overwrite the cloud backup with local data
    Push(SignIn),
    /// Sign in and replace local data with the cloud backup
    Pull(SignIn),
    /// Sign in and back up every local change until interrupted
    Watch(SignIn),
    /// Write every collection to a backup file
    Export { file: PathBuf },
    /// Replace local collections with the contents of a backup file
    Import {
        file: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct SignIn {
    /// Show the account chooser and consent screen again
    #[arg(long)]
    pub force_consent: bool,
}

fn open_backend(config: &Config) -> Result<Arc<FsBackend>> {
    Ok(Arc::new(FsBackend::new(config.data_dir()?)))
}

fn open_stores(config: &Config, backend: Arc<FsBackend>) -> Arc<CollectionStores> {
    Arc::new(CollectionStores::open(
        backend,
        ChangeBus::default(),
        Notifications::new(),
        config.sync.durability,
    ))
}

async fn open_coordinator(
    config: &Config,
    backend: Arc<FsBackend>,
) -> Result<SyncCoordinator<GoogleIdentity>> {
    let auth = CloudAuthClient::new(
        GoogleIdentity::new(&config.google)?,
        Arc::new(DriveConnector),
        &config.google,
        &config.sync,
    );
    let stores = open_stores(config, backend);
    let mut coordinator = SyncCoordinator::new(stores, auth, config.sync.debounce());
    coordinator.initialize().await?;
    Ok(coordinator)
}
