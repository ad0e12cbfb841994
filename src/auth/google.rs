use super::{IdentityProvider, Profile, Prompt, REQUESTED_SCOPES, TokenGrant};
use crate::classify::{ErrorClassifier, ErrorKind, ProviderError};
use crate::config::GoogleConfig;
use crate::error::{AppError, Result};
use crate::store::lock;
use async_trait::async_trait;
use oauth2::{
    AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, RedirectUrl, RequestTokenError, Scope, StandardRevocableToken,
    TokenResponse, TokenUrl,
    basic::{
        BasicClient, BasicErrorResponse, BasicRevocationErrorResponse,
        BasicTokenIntrospectionResponse, BasicTokenResponse,
    },
};
use reqwest::redirect::Policy;
use serde::Deserialize;
use std::sync::Mutex;
use tiny_http::{Response, Server};
use tracing::{debug, info, instrument, warn};
use url::Url;

const DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";

/// Endpoints published in the OpenID discovery document.
#[derive(Debug, Clone, Deserialize)]
struct Endpoints {
    authorization_endpoint: String,
    token_endpoint: String,
    userinfo_endpoint: String,
    revocation_endpoint: String,
}

// Type alias for the client when Auth and Token URLs are set
type ConfiguredClient = Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,    // HasAuthUrl
    EndpointNotSet, // HasDeviceAuthUrl
    EndpointNotSet, // HasIntrospectionUrl
    EndpointNotSet, // HasRevocationUrl
    EndpointSet,    // HasTokenUrl
>;

/// Google sign-in through the authorization code flow with PKCE and a
/// loopback redirect. No refresh token is requested.
pub struct GoogleIdentity {
    config: GoogleConfig,
    http_client: reqwest::Client,
    classifier: ErrorClassifier,
    endpoints: Mutex<Option<Endpoints>>,
}

impl GoogleIdentity {
    pub fn new(config: &GoogleConfig) -> Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .redirect(Policy::none())
            .build()
            .map_err(|e| AppError::Auth(format!("Failed to build reqwest client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            http_client,
            classifier: ErrorClassifier::with_origin(config.redirect_uri()),
            endpoints: Mutex::new(None),
        })
    }

    fn endpoints(&self) -> Result<Endpoints> {
        lock(&self.endpoints)
            .clone()
            .ok_or_else(|| AppError::Auth("Identity provider is not initialized".to_string()))
    }

    fn classify(&self, error: ProviderError) -> AppError {
        AppError::Cloud(self.classifier.classify(&error))
    }

    fn oauth_client(&self, endpoints: &Endpoints) -> Result<ConfiguredClient> {
        let auth_url = AuthUrl::new(endpoints.authorization_endpoint.clone())
            .map_err(|e| AppError::Auth(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(endpoints.token_endpoint.clone())
            .map_err(|e| AppError::Auth(format!("Invalid token URL: {}", e)))?;
        let redirect_url = RedirectUrl::new(self.config.redirect_uri())
            .map_err(|e| AppError::Auth(format!("Invalid redirect URL: {}", e)))?;

        Ok(BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.config.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.classify(ProviderError::from_reqwest(&e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify(ProviderError::http(status, &body)));
        }
        Ok(response)
    }

    /// Wait for the browser to hit the loopback redirect and return the
    /// authorization code.
    async fn receive_code(&self, server: Server, csrf_token: &CsrfToken) -> Result<String> {
        let timeout = self.config.login_timeout();
        let received = tokio::task::spawn_blocking(move || {
            server
                .recv_timeout(timeout)
                .map(|request| request.map(|request| (server, request)))
        })
        .await
        .map_err(|e| AppError::Auth(format!("Callback listener failed: {}", e)))?
        .map_err(|e| AppError::Auth(format!("Failed to receive request: {}", e)))?;

        let Some((_server, request)) = received else {
            return Err(self.classify(ProviderError {
                reasons: vec!["popup_closed".to_string()],
                message: Some("Authorization was not completed in time".to_string()),
                ..Default::default()
            }));
        };

        let callback_url = format!("{}{}", self.config.redirect_uri(), request.url());
        let url = Url::parse(&callback_url)
            .map_err(|e| AppError::Auth(format!("Failed to parse callback URL: {}", e)))?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        let outcome = if let Some(error) = param("error") {
            Err(self.classify(ProviderError {
                reasons: vec![error],
                message: param("error_description"),
                ..Default::default()
            }))
        } else if param("state").as_deref() != Some(csrf_token.secret().as_str()) {
            Err(AppError::Auth("CSRF token mismatch".to_string()))
        } else {
            param("code").ok_or_else(|| AppError::Auth("No code in callback".to_string()))
        };

        let page = match &outcome {
            Ok(_) => "Authentication successful! You can close this window.".to_string(),
            Err(e) => format!("Authentication failed: {}", e),
        };
        if let Err(e) = request.respond(Response::from_string(page)) {
            debug!(error = %e, "Failed to send callback response");
        }

        outcome
    }

    fn token_error<RE>(&self, e: RequestTokenError<RE, BasicErrorResponse>) -> AppError
    where
        RE: std::error::Error + 'static,
    {
        match e {
            RequestTokenError::ServerResponse(response) => self.classify(ProviderError {
                reasons: vec![response.error().to_string()],
                message: response.error_description().cloned(),
                ..Default::default()
            }),
            RequestTokenError::Request(e) => self.classify(ProviderError::transport(e.to_string())),
            other => AppError::Auth(format!("Failed to exchange code: {}", other)),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentity {
    #[instrument(name = "Loading Google discovery document", skip(self))]
    async fn discover(&self) -> Result<()> {
        let response = self.send(self.http_client.get(DISCOVERY_URL)).await?;
        let endpoints: Endpoints = response.json().await.map_err(|e| {
            self.classify(ProviderError {
                message: Some(format!("Malformed discovery document: {}", e)),
                ..Default::default()
            })
        })?;

        debug!(?endpoints, "Discovered Google endpoints");
        *lock(&self.endpoints) = Some(endpoints);
        Ok(())
    }

    #[instrument(name = "Authorizing with Google", skip(self))]
    async fn request_token(&self, prompt: Prompt) -> Result<TokenGrant> {
        let endpoints = self.endpoints()?;
        let client = self.oauth_client(&endpoints)?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let scopes = REQUESTED_SCOPES
            .iter()
            .map(|s| Scope::new(s.to_string()))
            .collect::<Vec<Scope>>();
        let mut auth_request = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes)
            .set_pkce_challenge(pkce_challenge);
        if let Some(prompt) = prompt.as_param() {
            auth_request = auth_request.add_extra_param("prompt", prompt);
        }

        // Start a local server to receive the callback
        let bind_addr = format!("127.0.0.1:{}", self.config.callback_port);
        let server = Server::http(&bind_addr)
            .map_err(|e| AppError::Auth(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        let (auth_url, csrf_token) = auth_request.url();
        println!("Open this URL in your browser:\n{}", auth_url);
        println!();
        println!("Waiting for authorization...");

        let code = self.receive_code(server, &csrf_token).await?;

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http_client)
            .await
            .map_err(|e| self.token_error(e))?;

        // Google omits the scope field when everything requested was granted
        let granted_scopes = match token.scopes() {
            Some(scopes) => scopes.iter().map(|s| s.as_str().to_string()).collect(),
            None => REQUESTED_SCOPES.iter().map(|s| s.to_string()).collect(),
        };

        Ok(TokenGrant {
            access_token: token.access_token().secret().clone(),
            granted_scopes,
            expires_in: token.expires_in(),
        })
    }

    #[instrument(name = "Fetching Google profile", skip_all)]
    async fn fetch_profile(&self, access_token: &str) -> Result<Profile> {
        let endpoints = self.endpoints()?;
        let response = self
            .send(
                self.http_client
                    .get(&endpoints.userinfo_endpoint)
                    .bearer_auth(access_token),
            )
            .await?;

        Ok(response.json().await?)
    }

    #[instrument(name = "Revoking Google token", skip_all)]
    async fn revoke(&self, access_token: &str) -> Result<()> {
        let endpoints = self.endpoints()?;
        match self
            .send(
                self.http_client
                    .post(&endpoints.revocation_endpoint)
                    .form(&[("token", access_token)]),
            )
            .await
        {
            Ok(_) => {
                info!("Revoked Google access token");
                Ok(())
            }
            // An already expired or revoked token is as good as revoked
            Err(e) if e.kind() == ErrorKind::Unclassified => {
                warn!(error = %e, "Token was already invalid");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
