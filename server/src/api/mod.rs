//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::auth::{self, Accounts, AuthError, GoogleOAuth, MessageResponse};
use crate::config::Config;
use crate::db::Database;
use crate::email::Mailer;
use crate::social;

/// Header carrying the client API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Store backend
    pub db: Arc<dyn Database>,
    /// Server configuration
    pub config: Arc<Config>,
    /// Account flows and identity resolution
    pub accounts: Arc<Accounts>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        db: Arc<dyn Database>,
        config: Config,
        google: Arc<dyn GoogleOAuth>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let config = Arc::new(config);
        let accounts = Arc::new(Accounts::new(config.clone(), google, mailer));
        Self {
            db,
            config,
            accounts,
        }
    }
}

/// Reject requests without the configured `X-API-Key`.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    if presented != Some(state.config.api_key.as_str()) {
        return Err(AuthError::CredentialsInvalid);
    }

    Ok(next.run(request).await)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins()
        .into_iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .allow_credentials(true)
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(root))
        .merge(auth::router())
        .merge(social::router())
        .layer(from_fn_with_state(state.clone(), require_api_key))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Root endpoint.
async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "API".to_string(),
    })
}
