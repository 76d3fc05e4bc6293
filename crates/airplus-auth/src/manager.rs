//! Token lifecycle management.
//!
//! Owns the credential set and its refresh policy: proactive refresh ahead of
//! expiry, revocation detection, signature re-fetch after rotation, and the
//! persist-notification callback.

use crate::oauth::OAuthClient;
use crate::rest::VendorClient;
use crate::tokens::{resolve_expiry, CredentialSet, CredentialUpdate, TokenResponse};
use crate::{AuthError, AuthResult};
use airplus_core::OidcConfig;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Callback invoked with the updated credential set after every successful
/// refresh, so the host framework can persist it.
pub type RefreshCallback = Arc<
    dyn Fn(
            CredentialUpdate,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send,
            >,
        > + Send
        + Sync,
>;

/// Lifecycle state of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No user identity fetched yet.
    Uninitialized,
    /// Identity and signature available; tokens usable.
    Ready,
    /// Refresh token revoked or expired; full re-authentication required.
    Expired,
}

/// Authentication manager.
pub struct AuthManager {
    oauth: OAuthClient,
    api: VendorClient,
    client_id: Option<String>,
    creds: CredentialSet,
    state: AuthState,
    refresh_lookahead: Duration,
    on_refresh: Option<RefreshCallback>,
}

impl AuthManager {
    /// Create a manager for the given OIDC endpoints and vendor API base URL.
    pub fn new(
        oidc: OidcConfig,
        api_base_url: impl Into<String>,
        client_id: Option<String>,
    ) -> Self {
        let oauth = OAuthClient::new(oidc, client_id.clone().unwrap_or_default());
        Self {
            oauth,
            api: VendorClient::new(api_base_url),
            client_id,
            creds: CredentialSet::default(),
            state: AuthState::Uninitialized,
            refresh_lookahead: Duration::minutes(15),
            on_refresh: None,
        }
    }

    /// Seed stored tokens (e.g. restored from the host framework's storage).
    pub fn with_tokens(
        mut self,
        access_token: Option<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.creds.access_token = access_token;
        self.creds.refresh_token = refresh_token;
        self.creds.expires_at = expires_at;
        self
    }

    /// Override the refresh lookahead window.
    pub fn with_refresh_lookahead(mut self, lookahead: Duration) -> Self {
        self.refresh_lookahead = lookahead;
        self
    }

    /// Register the callback fired after every successful refresh.
    pub fn set_refresh_callback(&mut self, callback: RefreshCallback) {
        self.on_refresh = Some(callback);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Current credential set.
    pub fn credentials(&self) -> &CredentialSet {
        &self.creds
    }

    /// Initialize authentication: fetch the user id and the signed
    /// broker-authorization blob. Returns false (and logs) on any failure.
    pub async fn initialize(&mut self) -> bool {
        let Some(access_token) = self.creds.access_token.clone() else {
            return false;
        };
        if access_token.trim().is_empty() {
            error!("Auth initialization failed: empty access token");
            return false;
        }

        let user = match self.api.get_user(&access_token).await {
            Ok(user) => user,
            Err(err) => {
                error!(error = %err, "Auth initialization failed fetching user");
                return false;
            }
        };
        let Some(user_id) = user.id else {
            error!("Auth initialization failed: user response missing id");
            return false;
        };

        let signature = match self.api.fetch_signature(&access_token).await {
            Ok(signature) => signature,
            Err(err) => {
                error!(error = %err, "Auth initialization failed fetching signature");
                return false;
            }
        };

        self.creds.user_id = Some(user_id);
        self.creds.signature = Some(signature);
        self.state = AuthState::Ready;
        true
    }

    /// Ensure a valid access token, refreshing when necessary.
    ///
    /// Without a refresh token this cannot self-heal and only reports whether
    /// an access token is present. An unknown expiry is treated as imminent
    /// and forces a refresh.
    pub async fn ensure_access_token(&mut self) -> AuthResult<bool> {
        if self.creds.refresh_token.is_none() {
            return Ok(self.creds.access_token.is_some());
        }

        let Some(expires_at) = self.creds.expires_at else {
            debug!("Token expiration unknown, forcing refresh");
            return self.refresh_access_token().await;
        };

        if needs_refresh(Utc::now(), Some(expires_at), self.refresh_lookahead) {
            info!("Token is about to expire, refreshing");
            return self.refresh_access_token().await;
        }

        Ok(true)
    }

    /// Force a refresh of the access token.
    ///
    /// On success the credential set is rewritten, the broker signature is
    /// re-fetched (non-fatal on failure), and the refresh callback runs.
    /// Returns `Ok(false)` for transient failures; fails with
    /// [`AuthError::AuthenticationExpired`] when the refresh token has been
    /// revoked, clearing it so no further attempts are made.
    pub async fn refresh_access_token(&mut self) -> AuthResult<bool> {
        let (Some(refresh_token), Some(_)) =
            (self.creds.refresh_token.clone(), self.client_id.as_ref())
        else {
            error!("Cannot refresh token: missing refresh_token or client_id");
            return Ok(false);
        };

        let response = match self.oauth.refresh_token(&refresh_token).await {
            Ok(response) => response,
            Err(err) => return self.handle_refresh_failure(err),
        };

        if !self.apply_token_response(&response, Utc::now()) {
            return Ok(false);
        }

        // A stale signature would be rejected by the broker together with the
        // new token, so fetch the matching one; losing this race is not fatal
        // for the refresh itself.
        if let Some(access_token) = self.creds.access_token.clone() {
            match self.api.fetch_signature(&access_token).await {
                Ok(signature) => {
                    self.creds.signature = Some(signature);
                    debug!("Signature refreshed after token refresh");
                }
                Err(err) => {
                    warn!(error = %err, "Failed to refresh signature after token refresh");
                }
            }
        }

        info!("Successfully refreshed access token");

        if let Some(callback) = &self.on_refresh {
            let update = CredentialUpdate {
                access_token: self.creds.access_token.clone(),
                refresh_token: self.creds.refresh_token.clone(),
                expires_at: self.creds.expires_at.map(|at| at.timestamp()),
                client_id: self.client_id.clone(),
            };
            if let Err(err) = callback(update).await {
                error!(error = %err, "Failed to execute token callback");
            }
        }

        Ok(true)
    }

    /// Write a successful token response into the credential set.
    ///
    /// The old refresh token survives when the response omits a new one; the
    /// stored expiry is only replaced when the response carries one.
    fn apply_token_response(&mut self, response: &TokenResponse, now: DateTime<Utc>) -> bool {
        let Some(access_token) = &response.access_token else {
            warn!("Token response did not contain an access token");
            return false;
        };

        self.creds.access_token = Some(access_token.clone());
        if let Some(refresh_token) = &response.refresh_token {
            self.creds.refresh_token = Some(refresh_token.clone());
        }
        if let Some(expires_at) = resolve_expiry(response, now) {
            self.creds.expires_at = Some(expires_at);
            debug!(expires_at = %expires_at, "Token refreshed");
        }
        true
    }

    fn handle_refresh_failure(&mut self, err: AuthError) -> AuthResult<bool> {
        if let AuthError::TokenExchange { status, body } = &err {
            if is_revocation(*status, body) {
                error!("Refresh token has expired or been revoked. Triggering re-authentication.");
                self.creds.refresh_token = None;
                self.state = AuthState::Expired;
                return Err(AuthError::AuthenticationExpired);
            }
        }
        error!(error = %err, "Failed to refresh token");
        Ok(false)
    }
}

/// Whether the token must be refreshed now.
fn needs_refresh(
    now: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    lookahead: Duration,
) -> bool {
    match expires_at {
        None => true,
        Some(expires_at) => now + lookahead > expires_at,
    }
}

/// A 401, or a 400 carrying `invalid_grant`, means the refresh token itself
/// was rejected rather than the request failing transiently.
fn is_revocation(status: u16, body: &str) -> bool {
    status == 401 || (status == 400 && body.contains("invalid_grant"))
}
