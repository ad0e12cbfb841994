use super::{BACKUP_FILE_NAME, RemoteConnector, RemoteFileOperations};
use crate::auth::AuthSession;
use crate::classify::ProviderError;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use google_drive3::api::{DriveHub, File, Scope};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use reqwest::StatusCode;
use std::io::Cursor;
use std::sync::Arc;
use tracing::instrument;

// Access limited to the application's private folder
const AUTH_SCOPE: Scope = Scope::Appdata;

const APP_DATA_FOLDER: &str = "appDataFolder";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

fn provider_error(e: google_drive3::Error) -> AppError {
    let error = match e {
        google_drive3::Error::BadRequest(body) => ProviderError::from_json(&body),
        google_drive3::Error::Failure(response) => {
            ProviderError::http(response.status().as_u16(), "")
        }
        google_drive3::Error::HttpError(e) => ProviderError::transport(e.to_string()),
        google_drive3::Error::Io(e) => ProviderError::transport(e.to_string()),
        other => ProviderError {
            message: Some(other.to_string()),
            ..Default::default()
        },
    };
    error.into()
}

pub struct DriveClient {
    hub: DriveHub<HttpsConnector<HttpConnector>>,
    http: reqwest::Client,
    access_token: String,
}

impl DriveClient {
    pub fn new(access_token: &str) -> Result<Self> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| AppError::Drive(format!("Failed to load native roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

        Ok(Self {
            hub: DriveHub::new(client, access_token.to_string()),
            http: reqwest::Client::new(),
            access_token: access_token.to_string(),
        })
    }
}

#[async_trait]
impl RemoteFileOperations for DriveClient {
    #[instrument(name = "Finding backup file", skip(self))]
    async fn find_backup_file(&self) -> Result<Option<String>> {
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .files()
                .list()
                .spaces(APP_DATA_FOLDER)
                .param("fields", "nextPageToken, files(id, name)")
                .page_size(100)
                .add_scope(AUTH_SCOPE);
            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, file_list) = call.doit().await.map_err(provider_error)?;

            let found = file_list
                .files
                .unwrap_or_default()
                .into_iter()
                .find(|file| file.name.as_deref() == Some(BACKUP_FILE_NAME))
                .and_then(|file| file.id);
            if found.is_some() {
                return Ok(found);
            }

            match file_list.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(None),
            }
        }
    }

    #[instrument(name = "Creating backup file", skip_all)]
    async fn create(&self, content: String) -> Result<String> {
        let metadata = File {
            name: Some(BACKUP_FILE_NAME.to_string()),
            parents: Some(vec![APP_DATA_FOLDER.to_string()]),
            mime_type: Some(mime::APPLICATION_JSON.to_string()),
            ..Default::default()
        };

        let (_, file) = self
            .hub
            .files()
            .create(metadata)
            .add_scope(AUTH_SCOPE)
            .upload(Cursor::new(content.into_bytes()), mime::APPLICATION_JSON)
            .await
            .map_err(provider_error)?;

        file.id
            .ok_or_else(|| AppError::Drive("Created backup file has empty ID".to_string()))
    }

    #[instrument(name = "Updating backup file", skip(self, content))]
    async fn update(&self, file_id: &str, content: String) -> Result<()> {
        self.hub
            .files()
            .update(File::default(), file_id)
            .add_scope(AUTH_SCOPE)
            .upload(Cursor::new(content.into_bytes()), mime::APPLICATION_JSON)
            .await
            .map_err(provider_error)?;

        Ok(())
    }

    #[instrument(name = "Downloading backup file", skip(self))]
    async fn get(&self, file_id: &str) -> Result<Option<String>> {
        let response = self
            .http
            .get(format!("{}/{}", FILES_URL, file_id))
            .query(&[("alt", "media")])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::from(ProviderError::from_reqwest(&e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http(status.as_u16(), &body).into());
        }

        Ok(Some(response.text().await?))
    }
}

/// Connects sessions to Google Drive's app-private folder.
pub struct DriveConnector;

impl RemoteConnector for DriveConnector {
    fn connect(&self, session: &AuthSession) -> Result<Arc<dyn RemoteFileOperations>> {
        Ok(Arc::new(DriveClient::new(session.access_token())?))
    }
}
