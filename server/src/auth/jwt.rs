//! JWT Token Generation and Validation
//!
//! HS256 with a single process-wide secret. Local access and refresh tokens
//! carry `{ email, exp, iat }`. Google refresh tokens are never stored raw;
//! they are wrapped in a locally signed `{ refresh_token }` envelope without
//! expiry.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::{AuthError, AuthResult};
use crate::config::Config;

/// Claims of a locally issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalClaims {
    /// Subject e-mail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    #[serde(default)]
    pub iat: i64,
}

/// Envelope around a Google refresh token.
#[derive(Debug, Serialize, Deserialize)]
struct GoogleEnvelope {
    refresh_token: String,
}

/// Why a token was rejected. Callers outside this module only ever see
/// [`AuthError::CredentialsInvalid`].
#[derive(Debug, Error)]
pub enum TokenError {
    /// Bad signature, malformed or expired.
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    /// Signature fine but a required claim is absent.
    #[error("missing claim: {0}")]
    MissingClaim(&'static str),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        tracing::debug!(error = %err, "Token rejected");
        Self::CredentialsInvalid
    }
}

/// Signs and validates local tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &str, access_ttl: i64, refresh_ttl: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            config.access_token_expiry,
            config.refresh_token_expiry,
        )
    }

    #[must_use]
    pub const fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    #[must_use]
    pub const fn refresh_ttl(&self) -> i64 {
        self.refresh_ttl
    }

    /// Sign `{ email, exp, iat }` valid for `ttl_seconds`.
    pub fn issue(&self, email: &str, ttl_seconds: i64) -> AuthResult<String> {
        let now = Utc::now();
        let claims = LocalClaims {
            email: Some(email.to_string()),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("Failed to sign token: {e}")))
    }

    pub fn issue_access(&self, email: &str) -> AuthResult<String> {
        self.issue(email, self.access_ttl)
    }

    pub fn issue_refresh(&self, email: &str) -> AuthResult<String> {
        self.issue(email, self.refresh_ttl)
    }

    /// Verify signature and expiry with zero leeway.
    pub fn decode(&self, token: &str) -> Result<LocalClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<LocalClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Decode and extract the subject e-mail.
    pub fn email_from(&self, token: &str) -> Result<String, TokenError> {
        self.decode(token)?
            .email
            .filter(|email| !email.is_empty())
            .ok_or(TokenError::MissingClaim("email"))
    }

    /// Wrap a raw Google refresh token.
    pub fn wrap_google_refresh(&self, raw: &str) -> AuthResult<String> {
        let envelope = GoogleEnvelope {
            refresh_token: raw.to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &envelope, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("Failed to sign envelope: {e}")))
    }

    /// Recover the raw Google refresh token from an envelope.
    pub fn unwrap_google_refresh(&self, envelope: &str) -> Result<String, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let data = decode::<GoogleEnvelope>(envelope, &self.decoding, &validation)?;
        if data.claims.refresh_token.is_empty() {
            return Err(TokenError::MissingClaim("refresh_token"));
        }
        Ok(data.claims.refresh_token)
    }
}
