use super::{SignIn, open_backend, open_coordinator};
use crate::config::Config;
use crate::error::Result;
use crate::notify::Notice;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub async fn push(sign_in: &SignIn) -> Result<()> {
    let config = Config::load()?;
    let mut coordinator = open_coordinator(&config, open_backend(&config)?).await?;

    let profile = coordinator.login_and_upload(sign_in.force_consent).await?;
    info!(email = %profile.email, "Local data uploaded");

    coordinator.logout().await?;
    coordinator.shutdown().await;
    Ok(())
}

pub async fn pull(sign_in: &SignIn) -> Result<()> {
    let config = Config::load()?;
    let mut coordinator = open_coordinator(&config, open_backend(&config)?).await?;

    let profile = coordinator.login(sign_in.force_consent).await?;
    info!(email = %profile.email, "Local data matches the cloud backup");

    coordinator.logout().await?;
    coordinator.shutdown().await;
    Ok(())
}

pub async fn watch(sign_in: &SignIn) -> Result<()> {
    let config = Config::load()?;
    let backend = open_backend(&config)?;
    let mut coordinator = open_coordinator(&config, backend.clone()).await?;
    let mut notices = coordinator.notices();
    let watcher = backend.watch(coordinator.stores().bus().clone())?;

    let profile = coordinator.login(sign_in.force_consent).await?;
    info!(email = %profile.email, "Watching for changes, press Ctrl-C to stop");

    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Ok(Notice::BackgroundSyncFailed(error)) => {
                    warn!(%error, remediation = %error.remediation, "Background sync failed");
                    if let Err(e) = coordinator.handle_background_failure(&error).await {
                        warn!(error = %e, "Recovery failed");
                    }
                }
                Ok(Notice::StorageWriteFailed { key, message }) => {
                    warn!(collection = %key, %message, "Local data could not be saved");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed notifications"),
                Err(RecvError::Closed) => break,
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    drop(watcher);
    coordinator.logout().await?;
    coordinator.shutdown().await;
    Ok(())
}
