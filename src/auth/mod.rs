mod client;
mod google;

pub use client::{CloudAuthClient, LoginOutcome};
pub use google::GoogleIdentity;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Scope required to read and write the app-private backup folder.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/drive.appdata";

pub const REQUESTED_SCOPES: &[&str] = &[STORAGE_SCOPE, "openid", "email", "profile"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Uninitialized,
    Initializing,
    /// App credentials are absent; the app runs local-only.
    ConfigMissing,
    /// The provider was unreachable. Only an explicit login retries.
    Disabled,
    Unauthenticated,
    Authenticated,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthState::Uninitialized => "uninitialized",
            AuthState::Initializing => "initializing",
            AuthState::ConfigMissing => "not configured",
            AuthState::Disabled => "disabled",
            AuthState::Unauthenticated => "signed out",
            AuthState::Authenticated => "signed in",
        };
        f.write_str(label)
    }
}

/// How hard the consent screen should insist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Let the provider skip screens the user already went through.
    Default,
    /// Force both the account chooser and the consent screen.
    ConsentAndSelectAccount,
}

impl Prompt {
    pub fn as_param(&self) -> Option<&'static str> {
        match self {
            Prompt::Default => None,
            Prompt::ConsentAndSelectAccount => Some("consent select_account"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Result of a completed authorization.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub granted_scopes: Vec<String>,
    pub expires_in: Option<Duration>,
}

impl TokenGrant {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("granted_scopes", &self.granted_scopes)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// An access token and who it belongs to. Lives only in memory: every new
/// process starts signed out.
#[derive(Clone)]
pub struct AuthSession {
    access_token: String,
    granted_scopes: Vec<String>,
    profile: Option<Profile>,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn new(grant: TokenGrant, profile: Option<Profile>) -> Self {
        let expires_at = grant
            .expires_in
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        Self {
            access_token: grant.access_token,
            granted_scopes: grant.granted_scopes,
            profile,
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn granted_scopes(&self) -> &[String] {
        &self.granted_scopes
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Check if the access token is expired or about to expire (within 5 minutes)
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at < Utc::now() + chrono::Duration::minutes(5))
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"<redacted>")
            .field("granted_scopes", &self.granted_scopes)
            .field("profile", &self.profile)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Load provider metadata. The caller bounds how long this may take.
    async fn discover(&self) -> Result<()>;

    async fn request_token(&self, prompt: Prompt) -> Result<TokenGrant>;

    async fn fetch_profile(&self, access_token: &str) -> Result<Profile>;

    async fn revoke(&self, access_token: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mocks {
    use super::*;
    use crate::classify::ProviderError;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ProviderState {
        discover_failures: Vec<ProviderError>,
        hang_discovery: bool,
        granted_scopes: Option<Vec<String>>,
        prompts: Vec<Prompt>,
        revoked: Vec<String>,
        issued: usize,
        token_lifetime: Option<Duration>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockIdentity {
        state: Arc<Mutex<ProviderState>>,
    }

    impl MockIdentity {
        /// The next discovery attempts fail with these errors, in order.
        pub(crate) fn fail_discovery(&self, errors: Vec<ProviderError>) {
            self.state.lock().unwrap().discover_failures = errors;
        }

        pub(crate) fn hang_discovery(&self) {
            self.state.lock().unwrap().hang_discovery = true;
        }

        pub(crate) fn grant_scopes(&self, scopes: &[&str]) {
            self.state.lock().unwrap().granted_scopes =
                Some(scopes.iter().map(|s| s.to_string()).collect());
        }

        /// Lifetime of tokens issued from now on. Defaults to an hour.
        pub(crate) fn token_lifetime(&self, lifetime: Duration) {
            self.state.lock().unwrap().token_lifetime = Some(lifetime);
        }

        pub(crate) fn prompts(&self) -> Vec<Prompt> {
            self.state.lock().unwrap().prompts.clone()
        }

        pub(crate) fn revoked(&self) -> Vec<String> {
            self.state.lock().unwrap().revoked.clone()
        }
    }

    #[async_trait]
    impl IdentityProvider for MockIdentity {
        async fn discover(&self) -> Result<()> {
            let (hang, failure) = {
                let mut state = self.state.lock().unwrap();
                let failure = (!state.discover_failures.is_empty())
                    .then(|| state.discover_failures.remove(0));
                (state.hang_discovery, failure)
            };
            if hang {
                std::future::pending::<()>().await;
            }
            match failure {
                Some(error) => Err(error.into()),
                None => Ok(()),
            }
        }

        async fn request_token(&self, prompt: Prompt) -> Result<TokenGrant> {
            let mut state = self.state.lock().unwrap();
            state.prompts.push(prompt);
            state.issued += 1;
            let granted_scopes = state.granted_scopes.clone().unwrap_or_else(|| {
                REQUESTED_SCOPES.iter().map(|s| s.to_string()).collect()
            });
            Ok(TokenGrant {
                access_token: format!("token-{}", state.issued),
                granted_scopes,
                expires_in: Some(
                    state
                        .token_lifetime
                        .unwrap_or(Duration::from_secs(3600)),
                ),
            })
        }

        async fn fetch_profile(&self, _access_token: &str) -> Result<Profile> {
            Ok(Profile {
                email: "user@example.com".to_string(),
                name: Some("Test User".to_string()),
                picture: None,
            })
        }

        async fn revoke(&self, access_token: &str) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .revoked
                .push(access_token.to_string());
            Ok(())
        }
    }
}
