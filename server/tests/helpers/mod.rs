//! Reusable test helpers for integration tests.
//!
//! Provides `TestApp` for driving the account flows directly or through the
//! full axum router, backed by the in-memory store and fake collaborators:
//! [`FakeGoogle`] stands in for Google's OAuth endpoints and
//! [`RecordingMailer`] keeps every message instead of sending it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use account_server::api::{create_router, AppState};
use account_server::auth::accounts::CredentialsForm;
use account_server::auth::google::{GoogleOAuth, GoogleTokens, GoogleUserInfo};
use account_server::auth::{Accounts, AuthError, AuthResult, IssuedSession, Session};
use account_server::config::Config;
use account_server::db::{CredentialStore, Database, MemoryStore, UnitOfWork, User, UserFilter};
use account_server::email::{MailError, Mailer};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

// ============================================================================
// Fake Google
// ============================================================================

#[derive(Default)]
struct GoogleState {
    /// authorization code -> tokens
    codes: HashMap<String, GoogleTokens>,
    /// live access token -> profile
    access: HashMap<String, GoogleUserInfo>,
    /// raw refresh token -> e-mail
    refresh: HashMap<String, String>,
}

/// In-process Google: codes, access tokens and refresh tokens are whatever
/// the test registers.
#[derive(Default)]
pub struct FakeGoogle {
    state: Mutex<GoogleState>,
    minted: AtomicUsize,
}

impl FakeGoogle {
    /// Make `code` exchangeable for `access_token` (+ optional raw refresh
    /// token), both belonging to `email`.
    pub fn grant(&self, code: &str, email: &str, access_token: &str, refresh_token: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.codes.insert(
            code.to_string(),
            GoogleTokens {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string),
            },
        );
        state.access.insert(
            access_token.to_string(),
            GoogleUserInfo {
                email: email.to_string(),
                name: Some("Google User".to_string()),
                picture: Some("https://example.com/avatar.png".to_string()),
            },
        );
        if let Some(raw) = refresh_token {
            state.refresh.insert(raw.to_string(), email.to_string());
        }
    }

    /// Expire an access token on Google's side.
    pub fn revoke_access(&self, access_token: &str) {
        self.state.lock().unwrap().access.remove(access_token);
    }

    /// Number of access tokens minted from refresh tokens so far.
    pub fn refreshes(&self) -> usize {
        self.minted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GoogleOAuth for FakeGoogle {
    fn authorize_url(&self, state: &str) -> AuthResult<String> {
        Ok(format!("https://accounts.google.test/auth?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<GoogleTokens> {
        self.state
            .lock()
            .unwrap()
            .codes
            .get(code)
            .cloned()
            .ok_or(AuthError::CredentialsInvalid)
    }

    async fn refresh_access(&self, refresh_token: &str) -> AuthResult<String> {
        let mut state = self.state.lock().unwrap();
        let email = state
            .refresh
            .get(refresh_token)
            .cloned()
            .ok_or(AuthError::CredentialsInvalid)?;
        let n = self.minted.fetch_add(1, Ordering::SeqCst);
        let access_token = format!("{refresh_token}-access-{n}");
        state.access.insert(
            access_token.clone(),
            GoogleUserInfo {
                email,
                name: None,
                picture: None,
            },
        );
        Ok(access_token)
    }

    async fn user_info(&self, access_token: &str) -> AuthResult<GoogleUserInfo> {
        self.state
            .lock()
            .unwrap()
            .access
            .get(access_token)
            .cloned()
            .ok_or(AuthError::CredentialsInvalid)
    }
}

// ============================================================================
// Recording Mailer
// ============================================================================

/// A message handed to the mailer.
#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Keeps every message; can be switched to fail like a broken SMTP relay.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    /// Code in the most recent message to `to`.
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.to == to)
            .and_then(|m| extract_code(&m.body))
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body_markdown: &str) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Transport("relay down".to_string()));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body_markdown.to_string(),
        });
        Ok(())
    }
}

/// The six-hex-character code in a bold span of a mail body.
pub fn extract_code(body: &str) -> Option<String> {
    body.split("**")
        .find(|part| part.len() == 6 && part.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
}

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router and its collaborators.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: MemoryStore,
    pub google: Arc<FakeGoogle>,
    pub mailer: Arc<RecordingMailer>,
    pub config: Arc<Config>,
}

impl TestApp {
    /// Create a new test app with the test configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Create a test app with a custom config (for expiry testing).
    pub fn with_config(config: Config) -> Self {
        let store = MemoryStore::new();
        let google = Arc::new(FakeGoogle::default());
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::new(
            Arc::new(store.clone()),
            config,
            google.clone(),
            mailer.clone(),
        );
        let config = state.config.clone();
        let router = create_router(state.clone());

        Self {
            router,
            state,
            store,
            google,
            mailer,
            config,
        }
    }

    pub fn accounts(&self) -> &Accounts {
        &self.state.accounts
    }

    /// Open a unit of work on the shared store.
    pub async fn uow(&self) -> Box<dyn UnitOfWork> {
        self.store.begin().await.expect("Failed to begin unit of work")
    }

    /// Committed user with this e-mail, any provider.
    pub async fn user_by_email(&self, email: &str) -> Option<User> {
        let uow = self.uow().await;
        let user = uow
            .find_user(UserFilter::email(email))
            .await
            .expect("Failed to look up user");
        uow.rollback().await.expect("Failed to roll back");
        user
    }

    /// Sign up a local account through the verification-code flow.
    pub async fn register(&self, email: &str, password: &str) -> IssuedSession {
        let form = CredentialsForm {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            confirm_password: Some(password.to_string()),
            ..Default::default()
        };

        let uow = self.uow().await;
        self.accounts()
            .request_signup_code(&*uow, &form)
            .await
            .expect("Failed to request sign-up code");
        uow.commit().await.expect("Failed to commit");

        let code = self
            .mailer
            .last_code_for(email)
            .expect("No verification code mailed");
        let form = CredentialsForm {
            code: Some(code),
            ..form
        };

        let uow = self.uow().await;
        let session = self
            .accounts()
            .signup(&*uow, &form)
            .await
            .expect("Failed to sign up");
        uow.commit().await.expect("Failed to commit");
        session
    }

    /// Build an HTTP request carrying the API key.
    pub fn request(&self, method: Method, uri: &str) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("X-API-Key", &self.config.api_key)
    }

    /// JSON request with optional cookies.
    pub fn json_request(
        &self,
        method: Method,
        uri: &str,
        cookies: Option<&str>,
        body: &serde_json::Value,
    ) -> Request<Body> {
        let mut builder = self
            .request(method, uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookies) = cookies {
            builder = builder.header(header::COOKIE, cookies);
        }
        builder
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }
}

/// `Cookie` header for a signed-in session.
pub fn cookie_header(session: &IssuedSession) -> String {
    format!(
        "access_token={}; refresh_token={}; provider={}",
        session.access_token, session.refresh_token, session.provider
    )
}

/// Session value for a signed-in session.
pub fn session_of(issued: &IssuedSession) -> Session {
    Session {
        access_token: Some(issued.access_token.clone()),
        refresh_token: Some(issued.refresh_token.clone()),
        provider: Some(issued.provider.to_string()),
    }
}

/// `name=value` pairs from every `Set-Cookie` header.
pub fn set_cookies(response: &Response<Body>) -> HashMap<String, String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Raw `Set-Cookie` header for `name`.
pub fn set_cookie_raw(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

/// Collect a response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
