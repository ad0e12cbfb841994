use crate::classify::{CloudError, ErrorClassifier, ErrorKind, ProviderError};
use crate::models::Collection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Cloud(#[from] CloudError),

    #[error("Google Drive API error: {0}")]
    Drive(String),

    #[error("OAuth2 authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid backup format: {0}")]
    InvalidBackupFormat(String),

    #[error("Failed to persist '{key}': {message}")]
    StorageWrite { key: Collection, message: String },

    #[error("Not signed in to cloud storage")]
    NotAuthenticated,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Project this error onto the sync error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Cloud(e) => e.kind,
            AppError::InvalidBackupFormat(_) => ErrorKind::InvalidBackupFormat,
            AppError::StorageWrite { .. } => ErrorKind::StorageWriteFailure,
            AppError::Http(e) => ErrorClassifier::default()
                .classify(&ProviderError::from_reqwest(e))
                .kind,
            _ => ErrorKind::Unclassified,
        }
    }

    /// Classified copy of this error, for reporting away from the call site.
    pub fn to_cloud(&self) -> CloudError {
        match self {
            AppError::Cloud(e) => e.clone(),
            other => CloudError::new(other.kind(), other.to_string()),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        AppError::Cloud(ErrorClassifier::default().classify(&e))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
