//! Authentication Service
//!
//! Local ("template") accounts with e-mailed verification codes, Google
//! sign-in, cookie sessions and account management.

pub mod accounts;
pub mod codes;
pub mod cookies;
mod error;
pub mod google;
mod handlers;
pub mod jwt;
pub mod password;
pub mod resolver;
pub mod session;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::api::AppState;

pub use accounts::{Accounts, IssuedSession, UserRead};
pub use error::{AuthError, AuthResult, CodeError, ErrorResponse};
pub use google::{GoogleClient, GoogleOAuth};
pub use handlers::MessageResponse;
pub use jwt::TokenIssuer;
pub use resolver::IdentityResolver;
pub use session::{RefreshOutcome, Session};

/// Create authentication router.
///
/// Credential routes:
/// - POST /verify-email - Mail a sign-up code
/// - POST /token/signup - Create a local account
/// - POST /token/login - Login with e-mail or username
/// - POST /verify-email/google - Redirect to Google
/// - POST /token/google - Google sign-up or login
/// - POST /token/refresh - Keep the session alive
/// - POST /token/logout - End the session
/// - POST /forgot-password - Mail a recovery code
/// - POST /check-code - Verify a recovery code
/// - POST /reset-password - Set a new password
///
/// Session routes (cookies required):
/// - POST /verify-email/update - Mail a code to a new address
/// - POST /update-email - Switch address
/// - GET /user/ - Current user
/// - PATCH /user/update - Update profile
/// - DELETE /user/delete - Delete account
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/verify-email", post(handlers::verify_email))
        .route("/verify-email/google", post(handlers::verify_email_google))
        .route("/verify-email/update", post(handlers::verify_email_update))
        .route("/token/signup", post(handlers::signup))
        .route("/token/login", post(handlers::login))
        .route("/token/google", post(handlers::token_google))
        .route("/token/refresh", post(handlers::refresh))
        .route("/token/logout", post(handlers::logout))
        .route("/forgot-password", post(handlers::forgot_password))
        .route("/check-code", post(handlers::check_code))
        .route("/reset-password", post(handlers::reset_password))
        .route("/update-email", post(handlers::update_email))
        .route("/user/", get(handlers::read_user))
        .route("/user/update", patch(handlers::update_user))
        .route("/user/delete", delete(handlers::delete_user))
}
