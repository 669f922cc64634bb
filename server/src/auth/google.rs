//! Google OAuth Client
//!
//! Plain OAuth2 against Google's authorize, token and userinfo endpoints.
//! Every failure talking to Google, or a response without the expected
//! token, is reported as [`AuthError::CredentialsInvalid`].

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{AuthError, AuthResult};
use crate::config::Config;

/// Tokens returned by the authorization-code grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleTokens {
    pub access_token: String,
    /// Only present when Google grants offline access.
    pub refresh_token: Option<String>,
}

/// Profile returned by the userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleUserInfo {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Operations the core needs from Google.
#[async_trait]
pub trait GoogleOAuth: Send + Sync {
    /// Consent page URL carrying `state` back to the frontend.
    fn authorize_url(&self, state: &str) -> AuthResult<String>;

    /// Authorization-code grant.
    async fn exchange_code(&self, code: &str) -> AuthResult<GoogleTokens>;

    /// Refresh-token grant; returns a fresh access token.
    async fn refresh_access(&self, refresh_token: &str) -> AuthResult<String>;

    /// Userinfo lookup with a bearer access token.
    async fn user_info(&self, access_token: &str) -> AuthResult<GoogleUserInfo>;
}

/// [`GoogleOAuth`] over HTTPS.
#[derive(Debug, Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleClient {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        if !config.has_google() {
            warn!("Google OAuth not configured, Google sign-in will be rejected");
        }
        Self {
            http: reqwest::Client::new(),
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
            auth_url: config.google_auth_url.clone(),
            token_url: config.google_token_url.clone(),
            userinfo_url: config.google_userinfo_url.clone(),
        }
    }

    fn credentials(&self) -> AuthResult<(&str, &str, &str)> {
        match (&self.client_id, &self.client_secret, &self.redirect_uri) {
            (Some(id), Some(secret), Some(redirect)) => {
                Ok((id.as_str(), secret.as_str(), redirect.as_str()))
            }
            _ => {
                warn!("Google OAuth request without configured credentials");
                Err(AuthError::CredentialsInvalid)
            }
        }
    }

    /// POST a grant to the token endpoint and return the JSON body.
    async fn token_request(&self, grant: &[(&str, &str)]) -> AuthResult<serde_json::Value> {
        let resp = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(grant)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Google token endpoint unreachable");
                AuthError::CredentialsInvalid
            })?;

        resp.json::<serde_json::Value>().await.map_err(|e| {
            warn!(error = %e, "Google token response unreadable");
            AuthError::CredentialsInvalid
        })
    }
}

fn access_token_from(body: &serde_json::Value) -> AuthResult<String> {
    body["access_token"]
        .as_str()
        .filter(|token| !token.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            let err = body["error"].as_str().unwrap_or("unknown");
            let desc = body["error_description"].as_str().unwrap_or("");
            warn!(error = err, description = desc, "Google token grant failed");
            AuthError::CredentialsInvalid
        })
}

#[async_trait]
impl GoogleOAuth for GoogleClient {
    fn authorize_url(&self, state: &str) -> AuthResult<String> {
        let (client_id, _, redirect_uri) = self.credentials()?;
        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| AuthError::Internal(format!("Invalid Google auth URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", "openid profile email")
            .append_pair("access_type", "offline")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<GoogleTokens> {
        let (client_id, client_secret, redirect_uri) = self.credentials()?;
        let body = self
            .token_request(&[
                ("code", code),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        Ok(GoogleTokens {
            access_token: access_token_from(&body)?,
            refresh_token: body["refresh_token"].as_str().map(String::from),
        })
    }

    async fn refresh_access(&self, refresh_token: &str) -> AuthResult<String> {
        let (client_id, client_secret, _) = self.credentials()?;
        let body = self
            .token_request(&[
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        access_token_from(&body)
    }

    async fn user_info(&self, access_token: &str) -> AuthResult<GoogleUserInfo> {
        let resp = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Google userinfo endpoint unreachable");
                AuthError::CredentialsInvalid
            })?;

        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), "Google userinfo rejected token");
            return Err(AuthError::CredentialsInvalid);
        }

        let info: GoogleUserInfo = resp.json().await.map_err(|e| {
            warn!(error = %e, "Google userinfo response unreadable");
            AuthError::CredentialsInvalid
        })?;
        if info.email.is_empty() {
            return Err(AuthError::CredentialsInvalid);
        }
        Ok(info)
    }
}
