//! Identity Resolution
//!
//! Maps a bearer credential plus its provider tag to an enabled local user.
//! For Google the credential may be either an access token or a refresh
//! envelope; the access path is tried first.

use std::sync::Arc;

use tracing::debug;

use super::error::{AuthError, AuthResult};
use super::google::GoogleOAuth;
use super::jwt::TokenIssuer;
use crate::db::{CredentialStore, Provider, User, UserFilter};

/// Resolves credentials to users.
#[derive(Clone)]
pub struct IdentityResolver {
    tokens: TokenIssuer,
    google: Arc<dyn GoogleOAuth>,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(tokens: TokenIssuer, google: Arc<dyn GoogleOAuth>) -> Self {
        Self { tokens, google }
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    #[must_use]
    pub fn google(&self) -> &dyn GoogleOAuth {
        self.google.as_ref()
    }

    /// Resolve with a provider tag as carried by the client.
    pub async fn resolve_tag<S>(&self, store: &S, provider: &str, token: &str) -> AuthResult<User>
    where
        S: CredentialStore + ?Sized,
    {
        let provider: Provider = provider.parse().map_err(|e| {
            debug!(error = %e, "Rejected credential with unknown provider");
            AuthError::CredentialsInvalid
        })?;
        self.resolve(store, provider, token).await
    }

    /// Resolve `token` issued under `provider` to an enabled user.
    pub async fn resolve<S>(&self, store: &S, provider: Provider, token: &str) -> AuthResult<User>
    where
        S: CredentialStore + ?Sized,
    {
        let email = match provider {
            Provider::Template => self.tokens.email_from(token)?,
            Provider::Google => self.google_email(token).await?,
        };

        store
            .find_user(UserFilter::email(&email).provider(provider).enabled())
            .await?
            .ok_or_else(|| {
                debug!(provider = %provider, "No enabled user for credential");
                AuthError::CredentialsInvalid
            })
    }

    /// E-mail behind a Google access token or refresh envelope.
    async fn google_email(&self, token: &str) -> AuthResult<String> {
        match self.google.user_info(token).await {
            Ok(info) => Ok(info.email),
            Err(_) => {
                debug!("Google userinfo rejected token, trying it as refresh envelope");
                let access = self.google_access_from_envelope(token).await?;
                Ok(self.google.user_info(&access).await?.email)
            }
        }
    }

    /// Exchange a refresh envelope for a fresh Google access token.
    pub async fn google_access_from_envelope(&self, envelope: &str) -> AuthResult<String> {
        let raw = self.tokens.unwrap_google_refresh(envelope)?;
        self.google.refresh_access(&raw).await
    }

    /// New access token for `user`, given the refresh token it presented.
    pub async fn renew_access(&self, user: &User, refresh_token: &str) -> AuthResult<String> {
        match user.provider {
            Provider::Template => self.tokens.issue_access(&user.email),
            Provider::Google => self.google_access_from_envelope(refresh_token).await,
        }
    }
}
