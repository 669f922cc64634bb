//! Account Flows
//!
//! Sign-up, login (local and Google), password recovery, e-mail change and
//! profile maintenance. Every method works inside the caller's unit of work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::codes;
use super::error::{AuthError, AuthResult, CodeError};
use super::google::GoogleOAuth;
use super::jwt::TokenIssuer;
use super::password::{hash_password, verify_password};
use super::resolver::IdentityResolver;
use crate::config::Config;
use crate::db::{CodePurpose, CredentialStore, NewUser, Provider, User, UserFilter};
use crate::email::Mailer;

/// Attempts at finding a free `base_xxxx` username before giving up.
const USERNAME_ATTEMPTS: usize = 16;

/// Longest username the profile and friend forms accept, in characters.
pub const USERNAME_MAX_LEN: usize = 64;

/// Length of the `_xxxx` collision suffix.
const SUFFIX_LEN: usize = 5;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Sign-up and login payload.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CredentialsForm {
    #[validate(email)]
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
    pub code: Option<String>,
    pub fullname: Option<String>,
    pub profile_picture: Option<String>,
}

/// Password recovery payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecoveryForm {
    pub email: Option<String>,
    pub username: Option<String>,
    pub code: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

/// E-mail change payload.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct EmailChangeForm {
    #[validate(email)]
    pub email: Option<String>,
    pub code: Option<String>,
}

/// Google callback payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GoogleAuthForm {
    pub code: Option<String>,
    pub state: String,
}

/// Profile changes; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    #[validate(length(max = 64))]
    pub username: Option<String>,
    pub fullname: Option<String>,
    pub profile_picture: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
    pub account_view: Option<String>,
    pub is_sidebar_open: Option<bool>,
}

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRead {
    pub uid: Uuid,
    pub provider: Provider,
    pub email: String,
    pub username: String,
    pub fullname: Option<String>,
    pub profile_picture: Option<String>,
    pub disabled: bool,
    pub account_view: String,
    pub is_sidebar_open: bool,
    pub join_date: DateTime<Utc>,
}

impl From<User> for UserRead {
    fn from(user: User) -> Self {
        Self {
            uid: user.uid,
            provider: user.provider,
            email: user.email,
            username: user.username,
            fullname: user.fullname,
            profile_picture: user.profile_picture,
            disabled: user.disabled,
            account_view: user.account_view,
            is_sidebar_open: user.is_sidebar_open,
            join_date: user.join_date,
        }
    }
}

/// Credentials handed to the client after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub provider: Provider,
}

/// Which Google flow the consent screen was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoogleIntent {
    Signup,
    Login,
}

impl GoogleIntent {
    fn parse(state: &str) -> Option<Self> {
        match state {
            "signup" => Some(Self::Signup),
            "login" => Some(Self::Login),
            _ => None,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn required<'a>(value: Option<&'a String>, what: &str) -> AuthResult<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.as_str()),
        _ => Err(AuthError::Validation(format!("{what} is empty"))),
    }
}

fn matching_passwords<'a>(
    password: Option<&'a String>,
    confirm: Option<&'a String>,
) -> AuthResult<&'a str> {
    let password = required(password, "Password")?;
    let confirm = required(confirm, "Confirm password")?;
    if password != confirm {
        return Err(AuthError::Validation("Passwords do not match".to_string()));
    }
    Ok(password)
}

/// Template-user lookup by e-mail, falling back to username.
fn template_filter<'a>(
    email: Option<&'a String>,
    username: Option<&'a String>,
) -> AuthResult<UserFilter<'a>> {
    let filter = match (email, username) {
        (Some(email), _) if !email.is_empty() => UserFilter::email(email),
        (_, Some(username)) if !username.is_empty() => UserFilter::username(username),
        _ => {
            return Err(AuthError::Validation(
                "Username or email is empty".to_string(),
            ))
        }
    };
    Ok(filter.provider(Provider::Template).enabled())
}

fn validate<T: Validate>(form: &T) -> AuthResult<()> {
    form.validate()
        .map_err(|e| AuthError::Validation(e.to_string()))
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Username candidate derived from the e-mail local part, cut to
/// [`USERNAME_MAX_LEN`] characters.
#[must_use]
pub fn username_base(email: &str) -> &str {
    match email.split('@').next() {
        Some(local) if !local.is_empty() => truncate_chars(local, USERNAME_MAX_LEN),
        _ => "user",
    }
}

/// `base_xxxx` with four random hex characters. The base is shortened so
/// the result stays within [`USERNAME_MAX_LEN`].
#[must_use]
pub fn with_collision_suffix(base: &str) -> String {
    let base = truncate_chars(base, USERNAME_MAX_LEN - SUFFIX_LEN);
    format!("{base}_{}", hex::encode(rand::random::<[u8; 2]>()))
}

/// First free username for `email`: the local part, else `local_xxxx`.
pub async fn generate_username<S>(store: &S, email: &str) -> AuthResult<String>
where
    S: CredentialStore + ?Sized,
{
    let base = username_base(email);
    let mut candidate = base.to_string();
    for _ in 0..USERNAME_ATTEMPTS {
        if store
            .find_user(UserFilter::username(&candidate))
            .await?
            .is_none()
        {
            return Ok(candidate);
        }
        candidate = with_collision_suffix(base);
    }
    Err(AuthError::Conflict(
        "Could not allocate a username".to_string(),
    ))
}

fn verify_body(intro: &str, code: &str) -> String {
    format!(
        "**{intro}**\n\n\
         Head back to the website and enter the following code to continue:\n\n\
         **{code}**\n\n\
         If you did not request this code, please ignore this email.\n"
    )
}

// ============================================================================
// Service
// ============================================================================

/// Account operations and their collaborators.
#[derive(Clone)]
pub struct Accounts {
    config: Arc<Config>,
    resolver: IdentityResolver,
    mailer: Arc<dyn Mailer>,
}

impl Accounts {
    #[must_use]
    pub fn new(config: Arc<Config>, google: Arc<dyn GoogleOAuth>, mailer: Arc<dyn Mailer>) -> Self {
        let tokens = TokenIssuer::from_config(&config);
        Self {
            resolver: IdentityResolver::new(tokens, google),
            config,
            mailer,
        }
    }

    #[must_use]
    pub const fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenIssuer {
        self.resolver.tokens()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn local_session(&self, user: User) -> AuthResult<IssuedSession> {
        let refresh_token = user
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::Internal("Session without refresh token".to_string()))?;
        Ok(IssuedSession {
            access_token: self.tokens().issue_access(&user.email)?,
            refresh_token,
            provider: user.provider,
            user,
        })
    }

    /// Mail a verification code to an unused address.
    ///
    /// Always succeeds for well-formed input so callers cannot learn which
    /// addresses are registered.
    pub async fn request_signup_code<S>(&self, store: &S, form: &CredentialsForm) -> AuthResult<()>
    where
        S: CredentialStore + ?Sized,
    {
        let email = required(form.email.as_ref(), "Email")?;
        matching_passwords(form.password.as_ref(), form.confirm_password.as_ref())?;
        validate(form)?;

        if store.find_user(UserFilter::email(email)).await?.is_some() {
            debug!("Sign-up code requested for a registered address");
            return Ok(());
        }

        let code = codes::issue(store, email, CodePurpose::Verify, self.config.verify_code_expiry).await?;
        self.mailer
            .send(email, "Verify Email", &verify_body("Welcome!", &code.code))
            .await?;
        Ok(())
    }

    /// Complete a local sign-up with the mailed code.
    pub async fn signup<S>(&self, store: &S, form: &CredentialsForm) -> AuthResult<IssuedSession>
    where
        S: CredentialStore + ?Sized,
    {
        let email = required(form.email.as_ref(), "Email")?;
        let password = required(form.password.as_ref(), "Password")?;
        codes::check(store, form.code.as_deref().unwrap_or_default(), email, CodePurpose::Verify)
            .await?;

        let user = store
            .insert_user(NewUser {
                provider: Provider::Template,
                email: email.to_string(),
                username: generate_username(store, email).await?,
                hashed_password: Some(hash_password(password)?),
                refresh_token: Some(self.tokens().issue_refresh(email)?),
                fullname: form.fullname.clone(),
                profile_picture: form.profile_picture.clone(),
            })
            .await?;

        info!(uid = %user.uid, username = %user.username, "User signed up");
        self.local_session(user)
    }

    /// Password login by e-mail or username; rotates the refresh token.
    pub async fn login<S>(&self, store: &S, form: &CredentialsForm) -> AuthResult<IssuedSession>
    where
        S: CredentialStore + ?Sized,
    {
        let filter = template_filter(form.email.as_ref(), form.username.as_ref())?;
        let password = required(form.password.as_ref(), "Password")?;

        let Some(mut user) = store.find_user(filter).await? else {
            debug!("Login for unknown account");
            return Err(AuthError::CredentialsInvalid);
        };
        let Some(hash) = user.hashed_password.as_deref() else {
            debug!(uid = %user.uid, "Login for account without a password");
            return Err(AuthError::CredentialsInvalid);
        };
        if !verify_password(password, hash)? {
            debug!(uid = %user.uid, "Login with wrong password");
            return Err(AuthError::CredentialsInvalid);
        }

        user.refresh_token = Some(self.tokens().issue_refresh(&user.email)?);
        store.update_user(&user).await?;

        info!(uid = %user.uid, "User logged in");
        self.local_session(user)
    }

    /// Google consent page for `state`.
    pub fn google_authorize_url(&self, state: &str) -> AuthResult<String> {
        if state.is_empty() {
            return Err(AuthError::Validation("State is empty".to_string()));
        }
        self.resolver.google().authorize_url(state)
    }

    /// Finish the Google flow; `state` picks sign-up or login.
    pub async fn google_sign_in<S>(&self, store: &S, form: &GoogleAuthForm) -> AuthResult<IssuedSession>
    where
        S: CredentialStore + ?Sized,
    {
        let code = required(form.code.as_ref(), "Code")?;
        if form.state.is_empty() {
            return Err(AuthError::Validation("State is empty".to_string()));
        }
        let intent = GoogleIntent::parse(&form.state).ok_or_else(|| {
            debug!(state = %form.state, "Unknown Google state");
            AuthError::CredentialsInvalid
        })?;

        let google = self.resolver.google();
        let tokens = google.exchange_code(code).await?;
        let info = google.user_info(&tokens.access_token).await?;
        let envelope = tokens
            .refresh_token
            .as_deref()
            .map(|raw| self.tokens().wrap_google_refresh(raw))
            .transpose()?;

        let existing = store
            .find_user(UserFilter::email(&info.email).provider(Provider::Google))
            .await?;

        let user = match (intent, existing) {
            (GoogleIntent::Signup, None) => {
                let Some(envelope) = envelope else {
                    debug!("Google sign-up without offline access");
                    return Err(AuthError::CredentialsInvalid);
                };
                let user = store
                    .insert_user(NewUser {
                        provider: Provider::Google,
                        email: info.email.clone(),
                        username: generate_username(store, &info.email).await?,
                        hashed_password: None,
                        refresh_token: Some(envelope),
                        fullname: info.name,
                        profile_picture: info.picture,
                    })
                    .await?;
                info!(uid = %user.uid, username = %user.username, "Google user signed up");
                user
            }
            (GoogleIntent::Login, Some(mut user)) => {
                if user.disabled {
                    return Err(AuthError::CredentialsInvalid);
                }
                if envelope.is_some() {
                    user.refresh_token = envelope;
                }
                store.update_user(&user).await?;
                info!(uid = %user.uid, "Google user logged in");
                user
            }
            (GoogleIntent::Signup, Some(_)) => {
                return Err(AuthError::Conflict("Account already exists".to_string()))
            }
            (GoogleIntent::Login, None) => {
                return Err(AuthError::NotFound("Account does not exist".to_string()))
            }
        };

        let refresh_token = user.refresh_token.clone().ok_or_else(|| {
            debug!(uid = %user.uid, "Google login without a stored refresh token");
            AuthError::CredentialsInvalid
        })?;
        Ok(IssuedSession {
            user,
            access_token: tokens.access_token,
            refresh_token,
            provider: Provider::Google,
        })
    }

    /// Mail a recovery code to a local account, if it exists.
    pub async fn forgot_password<S>(&self, store: &S, form: &RecoveryForm) -> AuthResult<()>
    where
        S: CredentialStore + ?Sized,
    {
        let filter = template_filter(form.email.as_ref(), form.username.as_ref())?;
        let Some(user) = store.find_user(filter).await? else {
            debug!("Recovery requested for unknown account");
            return Ok(());
        };

        let code = codes::issue(
            store,
            &user.email,
            CodePurpose::Recovery,
            self.config.recovery_code_expiry,
        )
        .await?;
        self.mailer
            .send(
                &user.email,
                "Password Recovery",
                &verify_body("You've requested a password reset.", &code.code),
            )
            .await?;
        info!(uid = %user.uid, "Recovery code sent");
        Ok(())
    }

    /// Verify a mailed recovery code.
    pub async fn check_recovery_code<S>(&self, store: &S, form: &RecoveryForm) -> AuthResult<()>
    where
        S: CredentialStore + ?Sized,
    {
        let filter = template_filter(form.email.as_ref(), form.username.as_ref())?;
        let code = form.code.as_deref().unwrap_or_default();
        if code.is_empty() {
            return Err(CodeError::Empty.into());
        }
        let user = store.find_user(filter).await?.ok_or(CodeError::NotFound)?;
        codes::check(store, code, &user.email, CodePurpose::Recovery).await?;
        Ok(())
    }

    /// Set a new password with the recovery code verified by
    /// [`Self::check_recovery_code`].
    ///
    /// Spends the code and revokes the stored refresh token.
    pub async fn reset_password<S>(&self, store: &S, form: &RecoveryForm) -> AuthResult<()>
    where
        S: CredentialStore + ?Sized,
    {
        let filter = template_filter(form.email.as_ref(), form.username.as_ref())?;
        let password = matching_passwords(form.password.as_ref(), form.confirm_password.as_ref())?;
        let code = form.code.as_deref().unwrap_or_default();
        if code.is_empty() {
            return Err(CodeError::Empty.into());
        }

        let mut user = store.find_user(filter).await?.ok_or(CodeError::NotFound)?;
        codes::consume_verified(
            store,
            code,
            &user.email,
            CodePurpose::Recovery,
            self.config.recovery_code_expiry,
        )
        .await?;

        user.hashed_password = Some(hash_password(password)?);
        user.refresh_token = None;
        store.update_user(&user).await?;
        info!(uid = %user.uid, "Password reset");
        Ok(())
    }

    /// Mail a verification code to the address `user` wants to switch to.
    pub async fn request_email_change<S>(
        &self,
        store: &S,
        user: &User,
        form: &EmailChangeForm,
    ) -> AuthResult<()>
    where
        S: CredentialStore + ?Sized,
    {
        if user.provider != Provider::Template {
            return Err(AuthError::Validation(
                "Unable to change email, did not create account with template".to_string(),
            ));
        }
        let email = required(form.email.as_ref(), "Email")?;
        if email == user.email {
            return Err(AuthError::Validation("Email is the same".to_string()));
        }
        validate(form)?;

        if store.find_user(UserFilter::email(email)).await?.is_some() {
            debug!(uid = %user.uid, "E-mail change to a registered address");
            return Ok(());
        }

        let code = codes::issue(store, email, CodePurpose::Verify, self.config.verify_code_expiry).await?;
        self.mailer
            .send(
                email,
                "Verify Email",
                &verify_body("You've requested to update your email.", &code.code),
            )
            .await?;
        Ok(())
    }

    /// Switch `user` to the verified address and re-issue both tokens.
    pub async fn update_email<S>(
        &self,
        store: &S,
        mut user: User,
        form: &EmailChangeForm,
    ) -> AuthResult<IssuedSession>
    where
        S: CredentialStore + ?Sized,
    {
        if user.provider != Provider::Template {
            return Err(AuthError::Validation(
                "Unable to change email, did not create account with template".to_string(),
            ));
        }
        let email = required(form.email.as_ref(), "Email")?;
        codes::check(store, form.code.as_deref().unwrap_or_default(), email, CodePurpose::Verify)
            .await?;

        user.email = email.to_string();
        user.refresh_token = Some(self.tokens().issue_refresh(email)?);
        store.update_user(&user).await?;
        info!(uid = %user.uid, "E-mail changed");
        self.local_session(user)
    }

    /// Apply profile changes.
    pub async fn update_profile<S>(
        &self,
        store: &S,
        mut user: User,
        update: &ProfileUpdate,
    ) -> AuthResult<User>
    where
        S: CredentialStore + ?Sized,
    {
        if update.email.is_some() {
            return Err(AuthError::Validation("Email cannot be updated".to_string()));
        }
        validate(update)?;

        if let Some(username) = &update.username {
            if username.is_empty() {
                return Err(AuthError::Validation("Username is empty".to_string()));
            }
            if *username != user.username
                && store
                    .find_user(UserFilter::username(username))
                    .await?
                    .is_some()
            {
                return Err(AuthError::Conflict("Username is taken".to_string()));
            }
            user.username.clone_from(username);
        }

        if update.password.is_some() || update.confirm_password.is_some() {
            if user.provider != Provider::Template {
                return Err(AuthError::Validation(
                    "Password cannot be set for Google accounts".to_string(),
                ));
            }
            let password =
                matching_passwords(update.password.as_ref(), update.confirm_password.as_ref())?;
            user.hashed_password = Some(hash_password(password)?);
        }

        if let Some(fullname) = &update.fullname {
            user.fullname = Some(fullname.clone());
        }
        if let Some(picture) = &update.profile_picture {
            user.profile_picture = Some(picture.clone());
        }
        if let Some(view) = &update.account_view {
            user.account_view.clone_from(view);
        }
        if let Some(open) = update.is_sidebar_open {
            user.is_sidebar_open = open;
        }

        store.update_user(&user).await?;
        Ok(user)
    }

    /// Remove the account and every friendship edge touching it.
    pub async fn delete_account<S>(&self, store: &S, user: &User) -> AuthResult<()>
    where
        S: CredentialStore + ?Sized,
    {
        store.delete_user(user.uid).await?;
        info!(uid = %user.uid, "User deleted");
        Ok(())
    }
}
