//! Server Configuration
//!
//! Loads configuration from environment variables. The resulting [`Config`] is
//! built once in `main` and handed to every component constructor.

use anyhow::{Context, Result};
use rand::RngCore;
use std::env;
use tracing_subscriber::EnvFilter;

/// Log directives used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "account_server=debug,tower_http=debug";

/// Default Google OAuth endpoints.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v1/userinfo";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// `PostgreSQL` connection URL, or `memory` for the in-process store
    pub database_url: String,

    /// Shared key every client must send in the `X-API-Key` header
    pub api_key: String,

    /// JWT signing secret (HS256)
    pub jwt_secret: String,

    /// Access token expiry in seconds (default: 900 = 15 min)
    pub access_token_expiry: i64,

    /// Refresh token expiry in seconds (default: 604800 = 7 days)
    pub refresh_token_expiry: i64,

    /// E-mail verification code expiry in seconds (default: 600)
    pub verify_code_expiry: i64,

    /// Password recovery code expiry in seconds (default: 600)
    pub recovery_code_expiry: i64,

    /// SMTP server host (optional)
    pub smtp_host: Option<String>,

    /// SMTP server port (default: 587)
    pub smtp_port: u16,

    /// SMTP login (optional)
    pub smtp_username: Option<String>,

    /// SMTP password (optional)
    pub smtp_password: Option<String>,

    /// Sender address, e.g. `Accounts <noreply@example.com>` (optional)
    pub smtp_from: Option<String>,

    /// SMTP security: `starttls` (default), `tls` or `none`
    pub smtp_tls: String,

    /// Frontend origin, used for CORS and redirects
    pub frontend_url: String,

    /// Google OAuth client ID (optional)
    pub google_client_id: Option<String>,

    /// Google OAuth client secret (optional)
    pub google_client_secret: Option<String>,

    /// Google OAuth redirect URI (optional)
    pub google_redirect_uri: Option<String>,

    /// Google authorization endpoint
    pub google_auth_url: String,

    /// Google token endpoint
    pub google_token_url: String,

    /// Google userinfo endpoint
    pub google_userinfo_url: String,
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn random_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = match env::var("API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!("API_KEY not set, generated a random key; clients will be rejected");
                random_api_key()
            }
        };

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            api_key,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            access_token_expiry: env_i64("ACCESS_TOKEN_EXPIRY", 900),
            refresh_token_expiry: env_i64("REFRESH_TOKEN_EXPIRY", 604_800),
            verify_code_expiry: env_i64("VERIFY_CODE_EXPIRY", 600),
            recovery_code_expiry: env_i64("RECOVERY_CODE_EXPIRY", 600),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env::var("SMTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").ok(),
            smtp_tls: env::var("SMTP_TLS").unwrap_or_else(|_| "starttls".into()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            google_client_id: env::var("GOOGLE_CLIENT_ID").ok(),
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET").ok(),
            google_redirect_uri: env::var("GOOGLE_REDIRECT_URI").ok(),
            google_auth_url: env::var("GOOGLE_AUTH_URL").unwrap_or_else(|_| GOOGLE_AUTH_URL.into()),
            google_token_url: env::var("GOOGLE_TOKEN_URL")
                .unwrap_or_else(|_| GOOGLE_TOKEN_URL.into()),
            google_userinfo_url: env::var("GOOGLE_USERINFO_URL")
                .unwrap_or_else(|_| GOOGLE_USERINFO_URL.into()),
        })
    }

    /// Check if SMTP is fully configured.
    #[must_use]
    pub const fn has_smtp(&self) -> bool {
        self.smtp_host.is_some()
            && self.smtp_username.is_some()
            && self.smtp_password.is_some()
            && self.smtp_from.is_some()
    }

    /// Check if Google OAuth is configured.
    #[must_use]
    pub const fn has_google(&self) -> bool {
        self.google_client_id.is_some()
            && self.google_client_secret.is_some()
            && self.google_redirect_uri.is_some()
    }

    /// Host part of the frontend URL (port stripped).
    #[must_use]
    pub fn frontend_domain(&self) -> &str {
        let rest = self
            .frontend_url
            .split_once("//")
            .map_or(self.frontend_url.as_str(), |(_, rest)| rest);
        rest.split([':', '/']).next().unwrap_or(rest)
    }

    /// Origins allowed by CORS: the frontend URL, plus its `www.` variant
    /// unless the frontend runs on localhost.
    #[must_use]
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![self.frontend_url.clone()];
        if self.frontend_domain() != "localhost" {
            if let Some((scheme, rest)) = self.frontend_url.split_once("//") {
                origins.push(format!("{scheme}//www.{rest}"));
            }
        }
        origins
    }

    /// Create a default configuration for testing.
    ///
    /// Uses the in-memory store; no SMTP or Google credentials.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            database_url: "memory".into(),
            api_key: "test-api-key".into(),
            jwt_secret: "test-secret".into(),
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            verify_code_expiry: 600,
            recovery_code_expiry: 600,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            smtp_tls: "starttls".into(),
            frontend_url: "http://localhost:3000".into(),
            google_client_id: Some("test-client-id".into()),
            google_client_secret: Some("test-client-secret".into()),
            google_redirect_uri: Some("http://localhost:3000/auth/google".into()),
            google_auth_url: GOOGLE_AUTH_URL.into(),
            google_token_url: GOOGLE_TOKEN_URL.into(),
            google_userinfo_url: GOOGLE_USERINFO_URL.into(),
        }
    }
}

/// Log filter from `RUST_LOG` directives, else [`DEFAULT_LOG_FILTER`].
///
/// Read the directives after `.env` is loaded so a value set there applies.
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}
