//! Session Cookies
//!
//! `access_token`, `refresh_token` and `provider`, all `Secure`, `HttpOnly`
//! and `SameSite=None`. The access cookie lives as long as the access token;
//! the other two as long as the refresh token.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use super::accounts::IssuedSession;
use super::jwt::TokenIssuer;
use super::session::Session;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const PROVIDER_COOKIE: &str = "provider";

fn session_cookie(name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Credentials carried by the request.
#[must_use]
pub fn session_from(jar: &CookieJar) -> Session {
    let read = |name| jar.get(name).map(|c| c.value().to_string());
    Session {
        access_token: read(ACCESS_COOKIE),
        refresh_token: read(REFRESH_COOKIE),
        provider: read(PROVIDER_COOKIE),
    }
}

/// Store a freshly signed-in session.
#[must_use]
pub fn set_session(jar: CookieJar, tokens: &TokenIssuer, session: &IssuedSession) -> CookieJar {
    let jar = set_access(jar, tokens, &session.access_token);
    let refresh_age = Duration::seconds(tokens.refresh_ttl());
    jar.add(session_cookie(
        REFRESH_COOKIE,
        session.refresh_token.clone(),
        refresh_age,
    ))
    .add(session_cookie(
        PROVIDER_COOKIE,
        session.provider.to_string(),
        refresh_age,
    ))
}

/// Replace the access cookie, e.g. after a refresh.
#[must_use]
pub fn set_access(jar: CookieJar, tokens: &TokenIssuer, access_token: &str) -> CookieJar {
    jar.add(session_cookie(
        ACCESS_COOKIE,
        access_token.to_string(),
        Duration::seconds(tokens.access_ttl()),
    ))
}

/// Expire all three cookies.
#[must_use]
pub fn clear_session(jar: CookieJar) -> CookieJar {
    [ACCESS_COOKIE, REFRESH_COOKIE, PROVIDER_COOKIE]
        .into_iter()
        .fold(jar, |jar, name| {
            jar.add(session_cookie(name, String::new(), Duration::ZERO))
        })
}
