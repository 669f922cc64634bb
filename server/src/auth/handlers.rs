//! Authentication Handlers
//!
//! Each handler runs its operation inside one unit of work and closes it with
//! [`finish`]. Session credentials travel in cookies.

use axum::{
    extract::State,
    response::Redirect,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tracing::warn;

use super::accounts::{
    CredentialsForm, EmailChangeForm, GoogleAuthForm, IssuedSession, ProfileUpdate, RecoveryForm,
    UserRead,
};
use super::cookies::{clear_session, session_from, set_session};
use super::error::{AuthError, AuthResult};
use super::session::RefreshOutcome;
use crate::api::AppState;
use crate::db::finish;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Plain message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

type SessionResponse = (CookieJar, Json<UserRead>);

fn signed_in(state: &AppState, jar: CookieJar, session: IssuedSession) -> SessionResponse {
    let jar = set_session(jar, state.accounts.tokens(), &session);
    (jar, Json(session.user.into()))
}

// ============================================================================
// Local Sign-up and Login
// ============================================================================

/// Mail a sign-up verification code.
///
/// POST /verify-email
#[tracing::instrument(skip(state, body))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(body): Json<CredentialsForm>,
) -> AuthResult<Json<MessageResponse>> {
    let uow = state.db.begin().await?;
    let result = state.accounts.request_signup_code(&*uow, &body).await;
    finish(uow, result).await?;
    Ok(message(
        "If the email exists, you will receive a verification email shortly.",
    ))
}

/// Complete sign-up with the mailed code.
///
/// POST /token/signup
#[tracing::instrument(skip(state, jar, body))]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<CredentialsForm>,
) -> AuthResult<SessionResponse> {
    let uow = state.db.begin().await?;
    let result = state.accounts.signup(&*uow, &body).await;
    let session = finish(uow, result).await?;
    Ok(signed_in(&state, jar, session))
}

/// Login with e-mail or username and password.
///
/// POST /token/login
#[tracing::instrument(skip(state, jar, body))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<CredentialsForm>,
) -> AuthResult<SessionResponse> {
    let uow = state.db.begin().await?;
    let result = state.accounts.login(&*uow, &body).await;
    let session = finish(uow, result).await?;
    Ok(signed_in(&state, jar, session))
}

// ============================================================================
// Google
// ============================================================================

/// Redirect to the Google consent page.
///
/// POST /verify-email/google
#[tracing::instrument(skip(state, body), fields(oauth_state = %body.state))]
pub async fn verify_email_google(
    State(state): State<AppState>,
    Json(body): Json<GoogleAuthForm>,
) -> AuthResult<Redirect> {
    let url = state.accounts.google_authorize_url(&body.state)?;
    Ok(Redirect::temporary(&url))
}

/// Sign up or log in with a Google authorization code.
///
/// POST /token/google
#[tracing::instrument(skip(state, jar, body), fields(oauth_state = %body.state))]
pub async fn token_google(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<GoogleAuthForm>,
) -> AuthResult<SessionResponse> {
    let uow = state.db.begin().await?;
    let result = state.accounts.google_sign_in(&*uow, &body).await;
    let session = finish(uow, result).await?;
    Ok(signed_in(&state, jar, session))
}

// ============================================================================
// Token Management
// ============================================================================

/// Keep the session alive, minting a new access token when needed.
///
/// POST /token/refresh
#[tracing::instrument(skip(state, jar))]
pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> AuthResult<SessionResponse> {
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = session.refresh(state.accounts.resolver(), &*uow).await;
    match finish(uow, result).await? {
        RefreshOutcome::StillValid(user) => Ok((jar, Json(user.into()))),
        RefreshOutcome::Renewed {
            user,
            access_token,
            refresh_token,
        } => {
            let provider = user.provider;
            Ok(signed_in(
                &state,
                jar,
                IssuedSession {
                    user,
                    access_token,
                    refresh_token,
                    provider,
                },
            ))
        }
    }
}

/// Revoke the stored refresh token if any credential still resolves, and
/// clear the cookies regardless.
///
/// POST /token/logout
#[tracing::instrument(skip(state, jar))]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    let session = session_from(&jar);
    match state.db.begin().await {
        Ok(uow) => {
            session.logout(state.accounts.resolver(), &*uow).await;
            if let Err(e) = finish(uow, Ok::<_, AuthError>(())).await {
                warn!(error = %e, "Failed to persist logout");
            }
        }
        Err(e) => warn!(error = %e, "Logout without store access"),
    }
    (clear_session(jar), message("Logout successful"))
}

// ============================================================================
// Password Recovery
// ============================================================================

/// Mail a recovery code.
///
/// POST /forgot-password
#[tracing::instrument(skip(state, body))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<RecoveryForm>,
) -> AuthResult<Json<MessageResponse>> {
    let uow = state.db.begin().await?;
    let result = state.accounts.forgot_password(&*uow, &body).await;
    finish(uow, result).await?;
    Ok(message(
        "If the email exists, you will receive a recovery email shortly.",
    ))
}

/// Verify a recovery code.
///
/// POST /check-code
#[tracing::instrument(skip(state, body))]
pub async fn check_code(
    State(state): State<AppState>,
    Json(body): Json<RecoveryForm>,
) -> AuthResult<Json<MessageResponse>> {
    let uow = state.db.begin().await?;
    let result = state.accounts.check_recovery_code(&*uow, &body).await;
    finish(uow, result).await?;
    Ok(message("Code is valid"))
}

/// Set a new password, then send the browser to the login page.
///
/// POST /reset-password
#[tracing::instrument(skip(state, body))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<RecoveryForm>,
) -> AuthResult<Redirect> {
    let uow = state.db.begin().await?;
    let result = state.accounts.reset_password(&*uow, &body).await;
    finish(uow, result).await?;
    Ok(Redirect::to(&format!(
        "{}/login",
        state.config.frontend_url
    )))
}

// ============================================================================
// E-mail Change
// ============================================================================

/// Mail a verification code to a new address.
///
/// POST /verify-email/update
#[tracing::instrument(skip(state, jar, body))]
pub async fn verify_email_update(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<EmailChangeForm>,
) -> AuthResult<Json<MessageResponse>> {
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = async {
        let user = session.authenticate(state.accounts.resolver(), &*uow).await?;
        state.accounts.request_email_change(&*uow, &user, &body).await
    }
    .await;
    finish(uow, result).await?;
    Ok(message(
        "If the email exists, you will receive a verification email shortly.",
    ))
}

/// Switch to the verified address.
///
/// POST /update-email
#[tracing::instrument(skip(state, jar, body))]
pub async fn update_email(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<EmailChangeForm>,
) -> AuthResult<SessionResponse> {
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = async {
        let user = session.authenticate(state.accounts.resolver(), &*uow).await?;
        state.accounts.update_email(&*uow, user, &body).await
    }
    .await;
    let issued = finish(uow, result).await?;
    Ok(signed_in(&state, jar, issued))
}

// ============================================================================
// User Management
// ============================================================================

/// Current user.
///
/// GET /user/
#[tracing::instrument(skip(state, jar))]
pub async fn read_user(State(state): State<AppState>, jar: CookieJar) -> AuthResult<Json<UserRead>> {
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = session.authenticate(state.accounts.resolver(), &*uow).await;
    let user = finish(uow, result).await?;
    Ok(Json(user.into()))
}

/// Update profile fields.
///
/// PATCH /user/update
#[tracing::instrument(skip(state, jar, body))]
pub async fn update_user(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<ProfileUpdate>,
) -> AuthResult<Json<UserRead>> {
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = async {
        let user = session.authenticate(state.accounts.resolver(), &*uow).await?;
        state.accounts.update_profile(&*uow, user, &body).await
    }
    .await;
    let user = finish(uow, result).await?;
    Ok(Json(user.into()))
}

/// Delete the current account.
///
/// DELETE /user/delete
#[tracing::instrument(skip(state, jar))]
pub async fn delete_user(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AuthResult<(CookieJar, Json<MessageResponse>)> {
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = async {
        let user = session.authenticate(state.accounts.resolver(), &*uow).await?;
        state.accounts.delete_account(&*uow, &user).await
    }
    .await;
    finish(uow, result).await?;
    Ok((clear_session(jar), message("User deleted")))
}
