//! Database Models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Users
// ============================================================================

/// Authentication domain a user belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "auth_provider", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local e-mail/password account.
    Template,
    /// Delegated Google OAuth account.
    Google,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "template" => Ok(Self::Template),
            "google" => Ok(Self::Google),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// User model.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub uid: Uuid,
    pub provider: Provider,
    pub email: String,
    pub username: String,
    /// Argon2 PHC string; only set for [`Provider::Template`].
    pub hashed_password: Option<String>,
    /// Current refresh token (or Google envelope token).
    pub refresh_token: Option<String>,
    pub disabled: bool,
    pub fullname: Option<String>,
    pub profile_picture: Option<String>,
    pub account_view: String,
    pub is_sidebar_open: bool,
    pub join_date: DateTime<Utc>,
}

/// Fields required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub provider: Provider,
    pub email: String,
    pub username: String,
    pub hashed_password: Option<String>,
    pub refresh_token: Option<String>,
    pub fullname: Option<String>,
    pub profile_picture: Option<String>,
}

impl NewUser {
    /// Materialize the row with a fresh uid and defaults.
    #[must_use]
    pub fn into_user(self) -> User {
        User {
            uid: Uuid::now_v7(),
            provider: self.provider,
            email: self.email,
            username: self.username,
            hashed_password: self.hashed_password,
            refresh_token: self.refresh_token,
            disabled: false,
            fullname: self.fullname,
            profile_picture: self.profile_picture,
            account_view: "profile".to_string(),
            is_sidebar_open: true,
            join_date: Utc::now(),
        }
    }
}

/// Lookup key for [`UserFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKey<'a> {
    Email(&'a str),
    Username(&'a str),
}

/// User lookup: one key plus optional provider and disabled filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserFilter<'a> {
    pub key: UserKey<'a>,
    pub provider: Option<Provider>,
    pub disabled: Option<bool>,
}

impl<'a> UserFilter<'a> {
    #[must_use]
    pub const fn email(email: &'a str) -> Self {
        Self {
            key: UserKey::Email(email),
            provider: None,
            disabled: None,
        }
    }

    #[must_use]
    pub const fn username(username: &'a str) -> Self {
        Self {
            key: UserKey::Username(username),
            provider: None,
            disabled: None,
        }
    }

    #[must_use]
    pub const fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Only match users that are not disabled.
    #[must_use]
    pub const fn enabled(mut self) -> Self {
        self.disabled = Some(false);
        self
    }

    /// Whether `user` satisfies every part of the filter.
    #[must_use]
    pub fn matches(&self, user: &User) -> bool {
        let key_matches = match self.key {
            UserKey::Email(email) => user.email == email,
            UserKey::Username(username) => user.username == username,
        };
        key_matches
            && self.provider.is_none_or(|p| p == user.provider)
            && self.disabled.is_none_or(|d| d == user.disabled)
    }
}

// ============================================================================
// Auth codes
// ============================================================================

/// What an [`AuthCode`] proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "code_purpose", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CodePurpose {
    /// Sign-up or e-mail change verification.
    Verify,
    /// Password recovery.
    Recovery,
}

/// Lifecycle of an [`AuthCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "code_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Pending,
    Verified,
    Expired,
}

/// Short-lived one-time code sent by e-mail.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AuthCode {
    pub id: Uuid,
    pub email: String,
    pub code: String,
    pub purpose: CodePurpose,
    pub status: CodeStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Friend requests
// ============================================================================

/// Status of a directed friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "friend_request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Reverted,
}

/// Terminal outcome of a pending request. Has no `Pending` variant, so a
/// request can never be "closed" back into the pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Accepted,
    Declined,
    Reverted,
}

impl From<RequestOutcome> for RequestStatus {
    fn from(outcome: RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Accepted => Self::Accepted,
            RequestOutcome::Declined => Self::Declined,
            RequestOutcome::Reverted => Self::Reverted,
        }
    }
}

/// Returned when a transition is attempted from a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot leave terminal state {from}")]
pub struct TerminalState {
    pub from: &'static str,
}

/// Directed edge sender → receiver.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: Uuid,
    pub sender_uid: Uuid,
    pub receiver_uid: Uuid,
    pub status: RequestStatus,
    pub request_date: DateTime<Utc>,
}

impl FriendRequest {
    /// New pending request.
    #[must_use]
    pub fn pending(sender_uid: Uuid, receiver_uid: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender_uid,
            receiver_uid,
            status: RequestStatus::Pending,
            request_date: Utc::now(),
        }
    }

    /// Move a pending request into a terminal state.
    pub fn close(&mut self, outcome: RequestOutcome) -> Result<(), TerminalState> {
        if self.status != RequestStatus::Pending {
            return Err(TerminalState {
                from: "closed friend request",
            });
        }
        self.status = outcome.into();
        Ok(())
    }
}

// ============================================================================
// Friends
// ============================================================================

/// Status of an undirected friend edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "friend_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Confirmed,
    Deleted,
}

/// Undirected friendship stored as an ordered pair.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Friend {
    pub id: Uuid,
    /// The user who accepted the request.
    pub friend_1_uid: Uuid,
    /// The user who sent the request.
    pub friend_2_uid: Uuid,
    pub status: FriendStatus,
    pub friendship_date: DateTime<Utc>,
}

impl Friend {
    /// Confirmed edge created from an accepted request.
    #[must_use]
    pub fn confirmed(accepter_uid: Uuid, requester_uid: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            friend_1_uid: accepter_uid,
            friend_2_uid: requester_uid,
            status: FriendStatus::Confirmed,
            friendship_date: Utc::now(),
        }
    }

    /// Whether `uid` is one of the two ends.
    #[must_use]
    pub fn involves(&self, uid: Uuid) -> bool {
        self.friend_1_uid == uid || self.friend_2_uid == uid
    }

    /// The other end of the edge, seen from `uid`.
    #[must_use]
    pub fn counterpart(&self, uid: Uuid) -> Uuid {
        if self.friend_1_uid == uid {
            self.friend_2_uid
        } else {
            self.friend_1_uid
        }
    }

    /// Soft-delete a confirmed friendship.
    pub fn remove(&mut self) -> Result<(), TerminalState> {
        if self.status != FriendStatus::Confirmed {
            return Err(TerminalState {
                from: "deleted friendship",
            });
        }
        self.status = FriendStatus::Deleted;
        Ok(())
    }
}

/// Which side of a request list to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDirection {
    /// Requests the user sent.
    Sent,
    /// Requests the user received.
    Incoming,
}
