//! One-time E-mail Codes
//!
//! Codes are six lowercase hex characters. Only the most recently issued code
//! for an (email, purpose) pair is considered; it moves from `pending` to
//! either `verified` (one successful check) or `expired` (first check past
//! its deadline).

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::error::{AuthResult, CodeError};
use crate::db::{AuthCode, CodePurpose, CodeStatus, CredentialStore};

/// Random six-character hex code.
#[must_use]
pub fn generate_code() -> String {
    hex::encode(rand::random::<[u8; 3]>())
}

/// Create and persist a pending code valid for `ttl_seconds`.
pub async fn issue<S>(
    store: &S,
    email: &str,
    purpose: CodePurpose,
    ttl_seconds: i64,
) -> AuthResult<AuthCode>
where
    S: CredentialStore + ?Sized,
{
    let now = Utc::now();
    let code = AuthCode {
        id: Uuid::now_v7(),
        email: email.to_string(),
        code: generate_code(),
        purpose,
        status: CodeStatus::Pending,
        created_at: now,
        expires_at: now + Duration::seconds(ttl_seconds),
        used_at: None,
    };
    store.insert_auth_code(&code).await?;
    tracing::debug!(email = %email, purpose = ?purpose, "Issued auth code");
    Ok(code)
}

/// Check `code` against the latest code for (email, purpose).
///
/// On success the code is marked verified. A code found past its deadline is
/// marked expired and persisted before [`CodeError::Expired`] is returned;
/// the caller must commit that write even though the check failed.
pub async fn check<S>(
    store: &S,
    code: &str,
    email: &str,
    purpose: CodePurpose,
) -> AuthResult<AuthCode>
where
    S: CredentialStore + ?Sized,
{
    if code.is_empty() {
        return Err(CodeError::Empty.into());
    }

    let mut record = store
        .latest_auth_code(email, purpose)
        .await?
        .ok_or(CodeError::NotFound)?;

    if record.code != code || record.status == CodeStatus::Verified {
        return Err(CodeError::Invalid.into());
    }

    let now = Utc::now();
    if record.status == CodeStatus::Expired {
        return Err(CodeError::Expired.into());
    }
    if now > record.expires_at {
        record.status = CodeStatus::Expired;
        store.update_auth_code(&record).await?;
        return Err(CodeError::Expired.into());
    }

    record.status = CodeStatus::Verified;
    record.used_at = Some(now);
    store.update_auth_code(&record).await?;
    Ok(record)
}

/// Spend `code`, which must be the latest code for (email, purpose) and
/// verified within the last `window_seconds`.
///
/// The code is moved to `expired` so it cannot authorize a second action. A
/// mismatching code is rejected without touching the record.
pub async fn consume_verified<S>(
    store: &S,
    code: &str,
    email: &str,
    purpose: CodePurpose,
    window_seconds: i64,
) -> AuthResult<AuthCode>
where
    S: CredentialStore + ?Sized,
{
    if code.is_empty() {
        return Err(CodeError::Empty.into());
    }

    let mut record = store
        .latest_auth_code(email, purpose)
        .await?
        .ok_or(CodeError::NotFound)?;
    if record.code != code {
        return Err(CodeError::Invalid.into());
    }

    match (record.status, record.used_at) {
        (CodeStatus::Verified, Some(used_at)) => {
            let fresh = Utc::now() <= used_at + Duration::seconds(window_seconds);
            record.status = CodeStatus::Expired;
            store.update_auth_code(&record).await?;
            if fresh {
                Ok(record)
            } else {
                Err(CodeError::Expired.into())
            }
        }
        (CodeStatus::Expired, _) => Err(CodeError::Expired.into()),
        _ => Err(CodeError::Invalid.into()),
    }
}
