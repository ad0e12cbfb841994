use super::{AuthSession, AuthState, IdentityProvider, Profile, Prompt, STORAGE_SCOPE};
use crate::classify::{CloudError, ErrorKind};
use crate::config::{GoogleConfig, SyncConfig};
use crate::drive::{RemoteConnector, RemoteFileOperations};
use crate::error::{AppError, Result};
use crate::models::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What a successful login hands back to the caller.
pub struct LoginOutcome {
    pub profile: Profile,
    pub remote: Arc<dyn RemoteFileOperations>,
    /// The backup currently in the cloud, if one was ever written.
    pub snapshot: Option<Snapshot>,
}

/// Drives the sign-in lifecycle against an [`IdentityProvider`].
///
/// Owns the only copy of the session. Nothing is persisted, so every new
/// client starts signed out.
pub struct CloudAuthClient<P> {
    provider: P,
    connector: Arc<dyn RemoteConnector>,
    configured: bool,
    init_timeout: Duration,
    state: AuthState,
    session: Option<AuthSession>,
    remote: Option<Arc<dyn RemoteFileOperations>>,
    /// Set after a permission failure; the next login forces consent.
    consent_required: bool,
}

impl<P: IdentityProvider> CloudAuthClient<P> {
    pub fn new(
        provider: P,
        connector: Arc<dyn RemoteConnector>,
        google: &GoogleConfig,
        sync: &SyncConfig,
    ) -> Self {
        Self {
            provider,
            connector,
            configured: google.is_configured(),
            init_timeout: sync.init_timeout(),
            state: AuthState::Uninitialized,
            session: None,
            remote: None,
            consent_required: false,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    pub fn remote(&self) -> Option<Arc<dyn RemoteFileOperations>> {
        self.remote.clone()
    }

    pub fn consent_required(&self) -> bool {
        self.consent_required
    }

    /// Whether the current access token is expired or about to expire.
    pub fn session_expired(&self) -> bool {
        self.session.as_ref().is_some_and(AuthSession::is_expired)
    }

    #[instrument(name = "Initializing cloud sync", skip(self))]
    pub async fn initialize(&mut self) -> Result<AuthState> {
        if !self.configured {
            info!("Google credentials not configured, running local-only");
            self.state = AuthState::ConfigMissing;
            return Ok(self.state);
        }

        self.state = AuthState::Initializing;
        match tokio::time::timeout(self.init_timeout, self.provider.discover()).await {
            Ok(Ok(())) => {
                debug!("Identity provider ready");
                self.state = AuthState::Unauthenticated;
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NetworkUnavailable => {
                warn!(error = %e, "Identity provider unreachable, disabling cloud sync");
                self.state = AuthState::Disabled;
            }
            Ok(Err(e)) => {
                self.state = AuthState::Disabled;
                return Err(e);
            }
            Err(_) => {
                warn!(timeout = ?self.init_timeout, "Identity provider timed out, disabling cloud sync");
                self.state = AuthState::Disabled;
            }
        }

        Ok(self.state)
    }

    /// Sign in, verify the storage scope and pull the current backup.
    ///
    /// A disabled client is re-initialized once first. Consent is forced
    /// when asked for or when the previous attempt lacked permission.
    #[instrument(name = "Signing in", skip(self))]
    pub async fn login(&mut self, force_consent: bool) -> Result<LoginOutcome> {
        match self.state {
            AuthState::Disabled => {
                debug!("Resetting disabled client before login");
                self.state = AuthState::Unauthenticated;
                self.initialize().await?;
            }
            AuthState::Uninitialized => {
                self.initialize().await?;
            }
            _ => {}
        }

        match self.state {
            AuthState::ConfigMissing => {
                return Err(CloudError::new(
                    ErrorKind::ConfigMissing,
                    "Google client credentials are not set",
                )
                .into());
            }
            AuthState::Disabled => {
                return Err(CloudError::new(
                    ErrorKind::NetworkUnavailable,
                    "Identity provider is unreachable",
                )
                .into());
            }
            _ => {}
        }

        let prompt = if force_consent || self.consent_required {
            Prompt::ConsentAndSelectAccount
        } else {
            Prompt::Default
        };

        let grant = match self.provider.request_token(prompt).await {
            Ok(grant) => grant,
            Err(e) => return Err(self.fail(e).await),
        };
        let profile = match self.provider.fetch_profile(&grant.access_token).await {
            Ok(profile) => profile,
            Err(e) => return Err(self.fail(e).await),
        };

        if !grant.has_scope(STORAGE_SCOPE) {
            warn!(granted = ?grant.granted_scopes, "Storage scope was not granted");
            let denied = CloudError::new(
                ErrorKind::PermissionDenied,
                "Access to the application data folder was not granted",
            );
            return Err(self.fail(denied.into()).await);
        }

        let session = AuthSession::new(grant, Some(profile.clone()));
        let remote = match self.connector.connect(&session) {
            Ok(remote) => remote,
            Err(e) => return Err(self.fail(e).await),
        };
        let snapshot = match remote.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail(e).await),
        };

        self.consent_required = false;
        if let Some(previous) = self.session.replace(session) {
            if let Err(e) = self.provider.revoke(previous.access_token()).await {
                debug!(error = %e, "Revoking the replaced token failed");
            }
        }
        self.remote = Some(remote.clone());
        self.state = AuthState::Authenticated;
        info!(email = %profile.email, "Signed in");

        Ok(LoginOutcome {
            profile,
            remote,
            snapshot,
        })
    }

    /// Save `last` one final time, then revoke and sign out.
    ///
    /// Neither a failed save nor a failed revocation keeps the session.
    #[instrument(name = "Signing out", skip_all)]
    pub async fn logout(&mut self, last: Option<&Snapshot>) -> Result<()> {
        if let (Some(remote), Some(snapshot)) = (self.remote.take(), last) {
            if let Err(e) = remote.save(snapshot).await {
                warn!(error = %e, "Final save before sign-out failed");
            }
        }
        self.revoke_session().await;

        if self.state == AuthState::Authenticated {
            self.state = AuthState::Unauthenticated;
        }
        info!("Signed out");
        Ok(())
    }

    /// Recover from a permission failure: drop the current grant and ask
    /// again with both the account chooser and the consent screen.
    #[instrument(name = "Re-requesting permission", skip(self))]
    pub async fn recover_permission(&mut self) -> Result<LoginOutcome> {
        self.revoke_session().await;
        self.remote = None;
        if self.state == AuthState::Authenticated {
            self.state = AuthState::Unauthenticated;
        }
        self.consent_required = true;
        self.login(true).await
    }

    /// Record a failure observed outside this client, e.g. by a background
    /// save, and move the state machine accordingly.
    ///
    /// A rejection of an expired token does not force consent. The session
    /// survives a network failure so that sign-out can still revoke it.
    pub fn handle_error(&mut self, error: &AppError) -> ErrorKind {
        let kind = error.kind();
        match kind {
            ErrorKind::PermissionDenied if self.session_expired() => {
                debug!("Access token expired");
            }
            ErrorKind::PermissionDenied => self.consent_required = true,
            ErrorKind::NetworkUnavailable => {
                warn!("Network failure, disabling cloud sync until the next login");
                self.remote = None;
                self.state = AuthState::Disabled;
            }
            _ => {}
        }
        kind
    }

    async fn revoke_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.provider.revoke(session.access_token()).await {
                warn!(error = %e, "Token revocation failed");
            }
        }
    }

    async fn fail(&mut self, error: AppError) -> AppError {
        self.revoke_session().await;
        self.remote = None;
        match error.kind() {
            ErrorKind::NetworkUnavailable => self.state = AuthState::Disabled,
            ErrorKind::PermissionDenied => {
                self.consent_required = true;
                self.state = AuthState::Unauthenticated;
            }
            _ => self.state = AuthState::Unauthenticated,
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::mocks::MockIdentity;
    use crate::classify::ProviderError;
    use crate::drive::mocks::{MockRemote, RemoteCall};
    use crate::models::snapshot::test_helpers::full_snapshot;

    fn configured() -> GoogleConfig {
        GoogleConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            ..Default::default()
        }
    }

    fn client(identity: &MockIdentity, remote: &MockRemote) -> CloudAuthClient<MockIdentity> {
        CloudAuthClient::new(
            identity.clone(),
            Arc::new(remote.clone()),
            &configured(),
            &SyncConfig::default(),
        )
    }

    fn permission_denied() -> ProviderError {
        ProviderError::from_json(&serde_json::json!({"status": "PERMISSION_DENIED"}))
    }

    #[tokio::test]
    async fn test_missing_credentials_is_config_missing() {
        let mut auth = CloudAuthClient::new(
            MockIdentity::default(),
            Arc::new(MockRemote::default()),
            &GoogleConfig::default(),
            &SyncConfig::default(),
        );

        assert_eq!(auth.initialize().await.unwrap(), AuthState::ConfigMissing);
        let err = auth.login(false).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigMissing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timeout_disables() {
        let identity = MockIdentity::default();
        identity.hang_discovery();
        let mut auth = client(&identity, &MockRemote::default());

        assert_eq!(auth.initialize().await.unwrap(), AuthState::Disabled);
    }

    #[tokio::test]
    async fn test_transient_failure_disables_until_login() {
        let identity = MockIdentity::default();
        identity.fail_discovery(vec![ProviderError::http(503, "")]);
        let mut auth = client(&identity, &MockRemote::default());

        assert_eq!(auth.initialize().await.unwrap(), AuthState::Disabled);

        // Explicit login re-initializes once; discovery now succeeds
        auth.login(false).await.unwrap();
        assert_eq!(auth.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_login_pulls_remote_snapshot() {
        let identity = MockIdentity::default();
        let remote = MockRemote::with_backup(&full_snapshot());
        let mut auth = client(&identity, &remote);
        auth.initialize().await.unwrap();

        let outcome = auth.login(false).await.unwrap();

        assert_eq!(auth.state(), AuthState::Authenticated);
        assert_eq!(outcome.profile.email, "user@example.com");
        assert_eq!(outcome.snapshot, Some(full_snapshot()));
        assert_eq!(identity.prompts(), vec![Prompt::Default]);
    }

    #[tokio::test]
    async fn test_missing_storage_scope_is_permission_denied() {
        let identity = MockIdentity::default();
        identity.grant_scopes(&["openid", "email", "profile"]);
        let remote = MockRemote::default();
        let mut auth = client(&identity, &remote);
        auth.initialize().await.unwrap();

        let err = auth.login(false).await.err().unwrap();

        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(auth.state(), AuthState::Unauthenticated);
        assert!(auth.session().is_none());
        assert!(remote.calls().is_empty(), "remote must not be touched");

        // The retry asks for consent and account selection
        identity.grant_scopes(&[STORAGE_SCOPE]);
        auth.login(false).await.unwrap();
        assert_eq!(
            identity.prompts(),
            vec![Prompt::Default, Prompt::ConsentAndSelectAccount]
        );
    }

    #[tokio::test]
    async fn test_permission_error_recovery_forces_consent() {
        let identity = MockIdentity::default();
        let mut auth = client(&identity, &MockRemote::default());
        auth.login(false).await.unwrap();

        let kind = auth.handle_error(&permission_denied().into());
        assert_eq!(kind, ErrorKind::PermissionDenied);
        auth.recover_permission().await.unwrap();

        assert_eq!(identity.revoked(), vec!["token-1".to_string()]);
        assert_eq!(
            identity.prompts(),
            vec![Prompt::Default, Prompt::ConsentAndSelectAccount]
        );
        assert_eq!(auth.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_logout_saves_then_revokes() {
        let identity = MockIdentity::default();
        let remote = MockRemote::default();
        let mut auth = client(&identity, &remote);
        auth.login(false).await.unwrap();

        auth.logout(Some(&full_snapshot())).await.unwrap();

        assert_eq!(remote.stored(), Some(full_snapshot()));
        assert_eq!(identity.revoked(), vec!["token-1".to_string()]);
        assert_eq!(auth.state(), AuthState::Unauthenticated);
        assert!(auth.session().is_none());
    }

    #[tokio::test]
    async fn test_logout_completes_when_final_save_fails() {
        let identity = MockIdentity::default();
        let remote = MockRemote::default();
        let mut auth = client(&identity, &remote);
        auth.login(false).await.unwrap();
        remote.fail_writes(Some(ProviderError::http(500, "")));

        auth.logout(Some(&full_snapshot())).await.unwrap();

        assert!(remote.calls().contains(&RemoteCall::Create));
        assert_eq!(identity.revoked().len(), 1);
        assert_eq!(auth.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_network_error_opens_circuit() {
        let identity = MockIdentity::default();
        let mut auth = client(&identity, &MockRemote::default());
        auth.login(false).await.unwrap();

        let kind = auth.handle_error(&ProviderError::transport("connection reset").into());

        assert_eq!(kind, ErrorKind::NetworkUnavailable);
        assert_eq!(auth.state(), AuthState::Disabled);
        assert!(auth.remote().is_none());

        // Sign-out still revokes the token
        auth.logout(None).await.unwrap();
        assert_eq!(identity.revoked(), vec!["token-1".to_string()]);
        assert!(auth.session().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_rejection_does_not_force_consent() {
        let identity = MockIdentity::default();
        identity.token_lifetime(Duration::from_secs(60));
        let mut auth = client(&identity, &MockRemote::default());
        auth.login(false).await.unwrap();
        assert!(auth.session_expired());

        let kind = auth.handle_error(&permission_denied().into());

        assert_eq!(kind, ErrorKind::PermissionDenied);
        assert!(!auth.consent_required());
    }

    #[tokio::test]
    async fn test_login_again_revokes_replaced_token() {
        let identity = MockIdentity::default();
        let mut auth = client(&identity, &MockRemote::default());
        auth.login(false).await.unwrap();

        auth.login(false).await.unwrap();

        assert_eq!(identity.revoked(), vec!["token-1".to_string()]);
        assert_eq!(auth.session().unwrap().access_token(), "token-2");
    }
}
