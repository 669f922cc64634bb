//! Account flow integration tests.
//!
//! Drives sign-up, login, session refresh, recovery, e-mail change and
//! profile updates against the in-memory store.
//!
//! Run with: `cargo test --test accounts_test`

mod helpers;

use account_server::auth::accounts::{CredentialsForm, EmailChangeForm, ProfileUpdate, RecoveryForm};
use account_server::auth::{AuthError, CodeError, RefreshOutcome, Session};
use account_server::config::Config;
use account_server::db::{finish, CodeStatus, CredentialStore, Provider};
use helpers::{session_of, TestApp};

fn signup_form(email: &str, password: &str) -> CredentialsForm {
    CredentialsForm {
        email: Some(email.to_string()),
        password: Some(password.to_string()),
        confirm_password: Some(password.to_string()),
        ..Default::default()
    }
}

fn login_form(email: Option<&str>, username: Option<&str>, password: &str) -> CredentialsForm {
    CredentialsForm {
        email: email.map(str::to_string),
        username: username.map(str::to_string),
        password: Some(password.to_string()),
        ..Default::default()
    }
}

// ============================================================================
// Sign-up
// ============================================================================

#[tokio::test]
async fn test_signup_scenario() {
    let app = TestApp::new();
    let form = signup_form("alice@example.com", "secret");

    let uow = app.uow().await;
    app.accounts().request_signup_code(&*uow, &form).await.unwrap();
    uow.commit().await.unwrap();

    let mails = app.mailer.sent();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].to, "alice@example.com");
    assert_eq!(mails[0].subject, "Verify Email");
    let code = app.mailer.last_code_for("alice@example.com").unwrap();

    // Wrong code is rejected and nothing is created.
    let uow = app.uow().await;
    let wrong = CredentialsForm {
        code: Some("zzzzzz".to_string()),
        ..form.clone()
    };
    let result = app.accounts().signup(&*uow, &wrong).await;
    assert!(matches!(result, Err(AuthError::Code(CodeError::Invalid))));
    finish(uow, result).await.unwrap_err();
    assert!(app.user_by_email("alice@example.com").await.is_none());

    // Right code creates the account.
    let right = CredentialsForm {
        code: Some(code),
        ..form.clone()
    };
    let uow = app.uow().await;
    let result = app.accounts().signup(&*uow, &right).await;
    let session = finish(uow, result).await.unwrap();
    assert_eq!(session.user.username, "alice");
    assert_eq!(session.user.provider, Provider::Template);
    assert_eq!(session.provider, Provider::Template);
    assert!(session.user.hashed_password.as_deref().unwrap().starts_with("$argon2"));
    assert_eq!(session.user.refresh_token.as_deref(), Some(session.refresh_token.as_str()));

    // The same code cannot complete a second sign-up.
    let uow = app.uow().await;
    let result = app.accounts().signup(&*uow, &right).await;
    assert!(matches!(result, Err(AuthError::Code(CodeError::Invalid))));
}

#[tokio::test]
async fn test_signup_username_collision_gets_suffix() {
    let app = TestApp::new();
    app.register("alice@example.com", "secret").await;
    let second = app.register("alice@other.org", "secret").await;

    let suffix = second.user.username.strip_prefix("alice_").unwrap();
    assert_eq!(suffix.len(), 4);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn test_signup_code_for_registered_email_is_silent() {
    let app = TestApp::new();
    app.register("alice@example.com", "secret").await;
    let before = app.mailer.sent().len();

    let uow = app.uow().await;
    app.accounts()
        .request_signup_code(&*uow, &signup_form("alice@example.com", "other"))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(app.mailer.sent().len(), before);
}

#[tokio::test]
async fn test_signup_code_validation() {
    let app = TestApp::new();
    let uow = app.uow().await;

    let mut form = signup_form("alice@example.com", "secret");
    form.confirm_password = Some("different".to_string());
    assert!(matches!(
        app.accounts().request_signup_code(&*uow, &form).await,
        Err(AuthError::Validation(m)) if m == "Passwords do not match"
    ));

    let form = signup_form("", "secret");
    assert!(matches!(
        app.accounts().request_signup_code(&*uow, &form).await,
        Err(AuthError::Validation(m)) if m == "Email is empty"
    ));

    let form = signup_form("not-an-email", "secret");
    assert!(matches!(
        app.accounts().request_signup_code(&*uow, &form).await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn test_mail_failure_rolls_back_issued_code() {
    let app = TestApp::new();
    app.mailer.set_failing(true);

    let uow = app.uow().await;
    let result = app
        .accounts()
        .request_signup_code(&*uow, &signup_form("alice@example.com", "secret"))
        .await;
    assert!(matches!(result, Err(AuthError::Transport(_))));
    finish(uow, result).await.unwrap_err();

    assert!(app.store.auth_codes_for("alice@example.com").is_empty());
}

#[tokio::test]
async fn test_expired_code_commits_expiry() {
    let mut config = Config::default_for_test();
    config.verify_code_expiry = -1;
    let app = TestApp::with_config(config);
    let form = signup_form("alice@example.com", "secret");

    let uow = app.uow().await;
    app.accounts().request_signup_code(&*uow, &form).await.unwrap();
    uow.commit().await.unwrap();
    let code = app.mailer.last_code_for("alice@example.com").unwrap();
    let form = CredentialsForm {
        code: Some(code),
        ..form
    };

    for _ in 0..2 {
        let uow = app.uow().await;
        let result = app.accounts().signup(&*uow, &form).await;
        assert!(matches!(result, Err(AuthError::Code(CodeError::Expired))));
        finish(uow, result).await.unwrap_err();
    }

    let codes = app.store.auth_codes_for("alice@example.com");
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].status, CodeStatus::Expired);
}

// ============================================================================
// Login and Sessions
// ============================================================================

#[tokio::test]
async fn test_login_by_email_or_username_rotates_refresh_token() {
    let app = TestApp::new();
    let signed_up = app.register("alice@example.com", "secret").await;

    let uow = app.uow().await;
    let by_email = app
        .accounts()
        .login(&*uow, &login_form(Some("alice@example.com"), None, "secret"))
        .await
        .unwrap();
    let by_username = app
        .accounts()
        .login(&*uow, &login_form(None, Some("alice"), "secret"))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(by_email.user.uid, signed_up.user.uid);
    assert_eq!(by_username.user.uid, signed_up.user.uid);
    let stored = app.user_by_email("alice@example.com").await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some(by_username.refresh_token.as_str()));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = TestApp::new();
    app.register("alice@example.com", "secret").await;
    let uow = app.uow().await;

    for form in [
        login_form(Some("alice@example.com"), None, "wrong"),
        login_form(Some("bob@example.com"), None, "secret"),
        login_form(None, Some("nobody"), "secret"),
    ] {
        assert!(matches!(
            app.accounts().login(&*uow, &form).await,
            Err(AuthError::CredentialsInvalid)
        ));
    }

    assert!(matches!(
        app.accounts().login(&*uow, &login_form(None, None, "secret")).await,
        Err(AuthError::Validation(m)) if m == "Username or email is empty"
    ));
}

#[tokio::test]
async fn test_disabled_user_cannot_login() {
    let app = TestApp::new();
    let session = app.register("alice@example.com", "secret").await;
    let mut user = session.user;
    user.disabled = true;
    app.store.put_user(user);

    let uow = app.uow().await;
    assert!(matches!(
        app.accounts()
            .login(&*uow, &login_form(Some("alice@example.com"), None, "secret"))
            .await,
        Err(AuthError::CredentialsInvalid)
    ));
}

#[tokio::test]
async fn test_refresh_logout_scenario() {
    let app = TestApp::new();
    app.register("alice@example.com", "secret").await;

    let uow = app.uow().await;
    let issued = app
        .accounts()
        .login(&*uow, &login_form(Some("alice@example.com"), None, "secret"))
        .await
        .unwrap();
    uow.commit().await.unwrap();
    let session = session_of(&issued);
    let resolver = app.accounts().resolver();

    // Immediate refresh resolves via the access token and rotates nothing.
    let uow = app.uow().await;
    let outcome = session.refresh(resolver, &*uow).await.unwrap();
    uow.commit().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::StillValid(ref u) if u.uid == issued.user.uid));
    let stored = app.user_by_email("alice@example.com").await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some(issued.refresh_token.as_str()));

    // Logout clears the stored refresh token.
    let uow = app.uow().await;
    assert!(session.logout(resolver, &*uow).await);
    uow.commit().await.unwrap();
    assert!(app
        .user_by_email("alice@example.com")
        .await
        .unwrap()
        .refresh_token
        .is_none());

    // The old refresh token no longer renews.
    let stale = Session {
        access_token: None,
        ..session
    };
    let uow = app.uow().await;
    assert!(matches!(
        stale.refresh(resolver, &*uow).await,
        Err(AuthError::CredentialsInvalid)
    ));
}

#[tokio::test]
async fn test_refresh_renews_from_refresh_token() {
    let app = TestApp::new();
    let issued = app.register("alice@example.com", "secret").await;
    let session = Session {
        access_token: Some("not-a-token".to_string()),
        ..session_of(&issued)
    };

    let uow = app.uow().await;
    let outcome = session
        .refresh(app.accounts().resolver(), &*uow)
        .await
        .unwrap();
    match outcome {
        RefreshOutcome::Renewed {
            user,
            access_token,
            refresh_token,
        } => {
            assert_eq!(user.uid, issued.user.uid);
            assert_eq!(refresh_token, issued.refresh_token);
            assert_eq!(
                app.accounts().tokens().email_from(&access_token).unwrap(),
                "alice@example.com"
            );
        }
        other => panic!("expected renewal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refresh_rejects_rotated_refresh_token() {
    let app = TestApp::new();
    let first = app.register("alice@example.com", "secret").await;

    // Another device logged in since; the stored token moved on.
    let mut user = first.user.clone();
    user.refresh_token = Some(
        app.accounts()
            .tokens()
            .issue("alice@example.com", 3600)
            .unwrap(),
    );
    app.store.put_user(user);

    let session = Session {
        access_token: None,
        ..session_of(&first)
    };
    let uow = app.uow().await;
    assert!(matches!(
        session.refresh(app.accounts().resolver(), &*uow).await,
        Err(AuthError::CredentialsInvalid)
    ));
}

#[tokio::test]
async fn test_authenticate_requires_access_and_provider() {
    let app = TestApp::new();
    let issued = app.register("alice@example.com", "secret").await;
    let resolver = app.accounts().resolver();
    let uow = app.uow().await;

    let no_provider = Session {
        provider: None,
        ..session_of(&issued)
    };
    assert!(matches!(
        no_provider.authenticate(resolver, &*uow).await,
        Err(AuthError::CredentialsInvalid)
    ));

    let unknown_provider = Session {
        provider: Some("github".to_string()),
        ..session_of(&issued)
    };
    assert!(matches!(
        unknown_provider.authenticate(resolver, &*uow).await,
        Err(AuthError::CredentialsInvalid)
    ));

    assert!(matches!(
        Session::default().authenticate(resolver, &*uow).await,
        Err(AuthError::CredentialsInvalid)
    ));

    let user = session_of(&issued).authenticate(resolver, &*uow).await.unwrap();
    assert_eq!(user.uid, issued.user.uid);
}

#[tokio::test]
async fn test_logout_without_credentials_is_harmless() {
    let app = TestApp::new();
    let uow = app.uow().await;
    assert!(!Session::default().logout(app.accounts().resolver(), &*uow).await);
}

// ============================================================================
// Recovery
// ============================================================================

fn recovery_form(email: &str) -> RecoveryForm {
    RecoveryForm {
        email: Some(email.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_password_recovery_flow() {
    let app = TestApp::new();
    let issued = app.register("alice@example.com", "secret").await;

    let uow = app.uow().await;
    app.accounts()
        .forgot_password(&*uow, &recovery_form("alice@example.com"))
        .await
        .unwrap();
    uow.commit().await.unwrap();
    let code = app.mailer.last_code_for("alice@example.com").unwrap();
    assert_eq!(app.mailer.sent().last().unwrap().subject, "Password Recovery");

    // Reset before the code is verified is refused.
    let reset = RecoveryForm {
        code: Some(code.clone()),
        password: Some("new-secret".to_string()),
        confirm_password: Some("new-secret".to_string()),
        ..recovery_form("alice@example.com")
    };
    let uow = app.uow().await;
    assert!(matches!(
        app.accounts().reset_password(&*uow, &reset).await,
        Err(AuthError::Code(CodeError::Invalid))
    ));
    uow.rollback().await.unwrap();

    // Verify the code, then reset with it.
    let check = RecoveryForm {
        code: Some(code),
        ..recovery_form("alice@example.com")
    };
    let uow = app.uow().await;
    app.accounts().check_recovery_code(&*uow, &check).await.unwrap();
    app.accounts().reset_password(&*uow, &reset).await.unwrap();
    uow.commit().await.unwrap();

    // Old password fails, new one works, old refresh token is revoked.
    let uow = app.uow().await;
    assert!(matches!(
        app.accounts()
            .login(&*uow, &login_form(Some("alice@example.com"), None, "secret"))
            .await,
        Err(AuthError::CredentialsInvalid)
    ));
    let stale = Session {
        access_token: None,
        ..session_of(&issued)
    };
    assert!(matches!(
        stale.refresh(app.accounts().resolver(), &*uow).await,
        Err(AuthError::CredentialsInvalid)
    ));
    app.accounts()
        .login(&*uow, &login_form(Some("alice@example.com"), None, "new-secret"))
        .await
        .unwrap();

    // The verified code was spent.
    assert!(matches!(
        app.accounts().reset_password(&*uow, &reset).await,
        Err(AuthError::Code(CodeError::Expired))
    ));
}

#[tokio::test]
async fn test_reset_needs_the_verified_code_itself() {
    let app = TestApp::new();
    app.register("alice@example.com", "secret").await;

    let uow = app.uow().await;
    app.accounts()
        .forgot_password(&*uow, &recovery_form("alice@example.com"))
        .await
        .unwrap();
    uow.commit().await.unwrap();
    let code = app.mailer.last_code_for("alice@example.com").unwrap();

    // The owner verifies the code.
    let check = RecoveryForm {
        code: Some(code.clone()),
        ..recovery_form("alice@example.com")
    };
    let uow = app.uow().await;
    app.accounts().check_recovery_code(&*uow, &check).await.unwrap();
    uow.commit().await.unwrap();

    // Knowing the address is not enough while that verification is fresh.
    let codeless = RecoveryForm {
        password: Some("intruder-pw".to_string()),
        confirm_password: Some("intruder-pw".to_string()),
        ..recovery_form("alice@example.com")
    };
    let uow = app.uow().await;
    assert!(matches!(
        app.accounts().reset_password(&*uow, &codeless).await,
        Err(AuthError::Code(CodeError::Empty))
    ));
    let wrong = if code == "000000" { "ffffff" } else { "000000" };
    let guessed = RecoveryForm {
        code: Some(wrong.to_string()),
        ..codeless.clone()
    };
    assert!(matches!(
        app.accounts().reset_password(&*uow, &guessed).await,
        Err(AuthError::Code(CodeError::Invalid))
    ));
    assert!(matches!(
        app.accounts()
            .login(&*uow, &login_form(Some("alice@example.com"), None, "intruder-pw"))
            .await,
        Err(AuthError::CredentialsInvalid)
    ));

    // The owner still completes the reset.
    let reset = RecoveryForm {
        code: Some(code),
        password: Some("new-secret".to_string()),
        confirm_password: Some("new-secret".to_string()),
        ..recovery_form("alice@example.com")
    };
    app.accounts().reset_password(&*uow, &reset).await.unwrap();
    app.accounts()
        .login(&*uow, &login_form(Some("alice@example.com"), None, "new-secret"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_recovery_for_unknown_account() {
    let app = TestApp::new();

    let uow = app.uow().await;
    app.accounts()
        .forgot_password(&*uow, &recovery_form("ghost@example.com"))
        .await
        .unwrap();
    assert!(app.mailer.sent().is_empty());

    let check = RecoveryForm {
        code: Some("abcdef".to_string()),
        ..recovery_form("ghost@example.com")
    };
    assert!(matches!(
        app.accounts().check_recovery_code(&*uow, &check).await,
        Err(AuthError::Code(CodeError::NotFound))
    ));
    assert!(matches!(
        app.accounts()
            .check_recovery_code(&*uow, &recovery_form("ghost@example.com"))
            .await,
        Err(AuthError::Code(CodeError::Empty))
    ));
}

// ============================================================================
// E-mail Change
// ============================================================================

#[tokio::test]
async fn test_email_change_reissues_tokens() {
    let app = TestApp::new();
    let issued = app.register("alice@example.com", "secret").await;
    let request = EmailChangeForm {
        email: Some("alice@new.org".to_string()),
        code: None,
    };

    let uow = app.uow().await;
    app.accounts()
        .request_email_change(&*uow, &issued.user, &request)
        .await
        .unwrap();
    uow.commit().await.unwrap();
    let code = app.mailer.last_code_for("alice@new.org").unwrap();

    let uow = app.uow().await;
    let updated = app
        .accounts()
        .update_email(
            &*uow,
            issued.user.clone(),
            &EmailChangeForm {
                code: Some(code),
                ..request
            },
        )
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(updated.user.email, "alice@new.org");
    assert_ne!(updated.refresh_token, issued.refresh_token);
    assert_eq!(
        app.accounts().tokens().email_from(&updated.access_token).unwrap(),
        "alice@new.org"
    );
    assert!(app.user_by_email("alice@example.com").await.is_none());

    // Credentials minted for the old address no longer resolve.
    let uow = app.uow().await;
    assert!(matches!(
        session_of(&issued)
            .authenticate(app.accounts().resolver(), &*uow)
            .await,
        Err(AuthError::CredentialsInvalid)
    ));
}

#[tokio::test]
async fn test_email_change_rules() {
    let app = TestApp::new();
    let issued = app.register("alice@example.com", "secret").await;
    let uow = app.uow().await;

    let same = EmailChangeForm {
        email: Some("alice@example.com".to_string()),
        code: None,
    };
    assert!(matches!(
        app.accounts().request_email_change(&*uow, &issued.user, &same).await,
        Err(AuthError::Validation(m)) if m == "Email is the same"
    ));

    let mut google_user = issued.user.clone();
    google_user.provider = Provider::Google;
    let other = EmailChangeForm {
        email: Some("alice@new.org".to_string()),
        code: None,
    };
    assert!(matches!(
        app.accounts().request_email_change(&*uow, &google_user, &other).await,
        Err(AuthError::Validation(m))
            if m == "Unable to change email, did not create account with template"
    ));
}

// ============================================================================
// Profile
// ============================================================================

#[tokio::test]
async fn test_profile_update() {
    let app = TestApp::new();
    let alice = app.register("alice@example.com", "secret").await;
    app.register("bob@example.com", "secret").await;
    let uow = app.uow().await;

    let update = ProfileUpdate {
        username: Some("bob".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        app.accounts().update_profile(&*uow, alice.user.clone(), &update).await,
        Err(AuthError::Conflict(_))
    ));

    let update = ProfileUpdate {
        email: Some("x@example.com".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        app.accounts().update_profile(&*uow, alice.user.clone(), &update).await,
        Err(AuthError::Validation(m)) if m == "Email cannot be updated"
    ));

    let update = ProfileUpdate {
        username: Some(String::new()),
        ..Default::default()
    };
    assert!(matches!(
        app.accounts().update_profile(&*uow, alice.user.clone(), &update).await,
        Err(AuthError::Validation(m)) if m == "Username is empty"
    ));

    let update = ProfileUpdate {
        username: Some("alice2".to_string()),
        fullname: Some("Alice Liddell".to_string()),
        account_view: Some("friends".to_string()),
        is_sidebar_open: Some(false),
        password: Some("changed".to_string()),
        confirm_password: Some("changed".to_string()),
        ..Default::default()
    };
    let user = app
        .accounts()
        .update_profile(&*uow, alice.user.clone(), &update)
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(user.username, "alice2");
    assert_eq!(user.fullname.as_deref(), Some("Alice Liddell"));
    assert_eq!(user.account_view, "friends");
    assert!(!user.is_sidebar_open);

    let uow = app.uow().await;
    app.accounts()
        .login(&*uow, &login_form(None, Some("alice2"), "changed"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_account() {
    let app = TestApp::new();
    let alice = app.register("alice@example.com", "secret").await;

    let uow = app.uow().await;
    app.accounts().delete_account(&*uow, &alice.user).await.unwrap();
    uow.commit().await.unwrap();

    assert!(app.store.user(alice.user.uid).is_none());
    let uow = app.uow().await;
    assert!(uow.find_user_by_uid(alice.user.uid).await.unwrap().is_none());
}
