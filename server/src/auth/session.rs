//! Client Sessions
//!
//! A session is the three credentials the client carries: access token,
//! refresh token and provider tag. Any of them may be missing.

use tracing::{debug, info, warn};

use super::error::{AuthError, AuthResult};
use super::resolver::IdentityResolver;
use crate::db::{CredentialStore, User};

/// Credentials presented by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub provider: Option<String>,
}

/// Result of [`Session::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The access token still resolves; nothing changed.
    StillValid(User),
    /// A new access token was minted from the refresh token.
    Renewed {
        user: User,
        access_token: String,
        refresh_token: String,
    },
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

impl Session {
    fn access(&self) -> Option<&str> {
        present(self.access_token.as_ref())
    }

    fn refresh_token(&self) -> Option<&str> {
        present(self.refresh_token.as_ref())
    }

    fn provider(&self) -> Option<&str> {
        present(self.provider.as_ref())
    }

    /// Resolve the caller from the access token.
    ///
    /// Fails without touching the resolver when either the access token or
    /// the provider is missing.
    pub async fn authenticate<S>(&self, resolver: &IdentityResolver, store: &S) -> AuthResult<User>
    where
        S: CredentialStore + ?Sized,
    {
        let (Some(token), Some(provider)) = (self.access(), self.provider()) else {
            return Err(AuthError::CredentialsInvalid);
        };
        resolver.resolve_tag(store, provider, token).await
    }

    /// Keep the session alive.
    ///
    /// A resolving access token wins. Otherwise the refresh token must
    /// resolve to a user whose stored refresh token is the same string,
    /// and a new access token is minted for that user's provider.
    pub async fn refresh<S>(
        &self,
        resolver: &IdentityResolver,
        store: &S,
    ) -> AuthResult<RefreshOutcome>
    where
        S: CredentialStore + ?Sized,
    {
        match self.authenticate(resolver, store).await {
            Ok(user) => return Ok(RefreshOutcome::StillValid(user)),
            Err(AuthError::CredentialsInvalid) => {}
            Err(e) => return Err(e),
        }

        let (Some(refresh_token), Some(provider)) = (self.refresh_token(), self.provider()) else {
            return Err(AuthError::CredentialsInvalid);
        };

        let user = resolver.resolve_tag(store, provider, refresh_token).await?;
        if user.refresh_token.as_deref() != Some(refresh_token) {
            debug!(uid = %user.uid, "Refresh token revoked or rotated");
            return Err(AuthError::CredentialsInvalid);
        }

        let access_token = resolver.renew_access(&user, refresh_token).await?;
        Ok(RefreshOutcome::Renewed {
            user,
            access_token,
            refresh_token: refresh_token.to_string(),
        })
    }

    /// Clear the stored refresh token of whoever this session belongs to.
    ///
    /// Tries the access token, then the refresh token. Never fails; returns
    /// whether a user was found and revoked.
    pub async fn logout<S>(&self, resolver: &IdentityResolver, store: &S) -> bool
    where
        S: CredentialStore + ?Sized,
    {
        let Some(provider) = self.provider() else {
            return false;
        };

        for token in [self.access(), self.refresh_token()].into_iter().flatten() {
            let Ok(mut user) = resolver.resolve_tag(store, provider, token).await else {
                continue;
            };
            user.refresh_token = None;
            match store.update_user(&user).await {
                Ok(()) => {
                    info!(uid = %user.uid, "User logged out");
                    return true;
                }
                Err(e) => {
                    warn!(uid = %user.uid, error = %e, "Failed to revoke refresh token");
                    return false;
                }
            }
        }
        false
    }
}
