use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AuthError, ErrorResponse};
use crate::db::{CommitPolicy, Friend, FriendRequest, RequestStatus, StoreError, TerminalState, User};

/// Request naming the other user of a friend action
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct UsernameForm {
    #[validate(length(max = 64))]
    pub username: String,
}

/// A friend request as seen by one of its ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequestRead {
    pub uid: Uuid,
    pub join_date: DateTime<Utc>,
    pub profile_picture: Option<String>,
    pub username: String,
    pub request_date: DateTime<Utc>,
    pub status: RequestStatus,
}

impl From<(User, FriendRequest)> for FriendRequestRead {
    fn from((counterpart, request): (User, FriendRequest)) -> Self {
        Self {
            uid: counterpart.uid,
            join_date: counterpart.join_date,
            profile_picture: counterpart.profile_picture,
            username: counterpart.username,
            request_date: request.request_date,
            status: request.status,
        }
    }
}

/// A friend with the date the friendship started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRead {
    pub uid: Uuid,
    pub join_date: DateTime<Utc>,
    pub profile_picture: Option<String>,
    pub username: String,
    pub friendship_date: DateTime<Utc>,
}

impl From<(User, Friend)> for FriendRead {
    fn from((counterpart, friend): (User, Friend)) -> Self {
        Self {
            uid: counterpart.uid,
            join_date: counterpart.join_date,
            profile_picture: counterpart.profile_picture,
            username: counterpart.username,
            friendship_date: friend.friendship_date,
        }
    }
}

/// Error types for social operations
#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("{0}")]
    Validation(String),

    #[error("Friend not found")]
    UserNotFound,

    #[error("Friend request not found")]
    RequestNotFound,

    #[error("Friend not added")]
    FriendNotFound,

    #[error("Friend request already sent")]
    RequestAlreadySent,

    #[error("Friend request already received")]
    RequestAlreadyReceived,

    #[error("Friend already added")]
    AlreadyFriends,

    #[error(transparent)]
    InvalidTransition(#[from] TerminalState),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Database error")]
    Store(StoreError),
}

impl From<StoreError> for SocialError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(constraint) => {
                tracing::debug!(%constraint, "Friend write rejected by constraint");
                if constraint == "uq_friends_confirmed_pair" {
                    Self::AlreadyFriends
                } else {
                    Self::Conflict("Friend request already pending".to_string())
                }
            }
            other => Self::Store(other),
        }
    }
}

impl CommitPolicy for SocialError {
    fn commit_on_error(&self) -> bool {
        match self {
            Self::Auth(e) => e.commit_on_error(),
            _ => false,
        }
    }
}

impl IntoResponse for SocialError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Auth(err) => err.status(),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            Self::RequestNotFound => (StatusCode::NOT_FOUND, "REQUEST_NOT_FOUND"),
            Self::FriendNotFound => (StatusCode::NOT_FOUND, "FRIEND_NOT_FOUND"),
            Self::RequestAlreadySent => (StatusCode::CONFLICT, "REQUEST_ALREADY_SENT"),
            Self::RequestAlreadyReceived => (StatusCode::CONFLICT, "REQUEST_ALREADY_RECEIVED"),
            Self::AlreadyFriends => (StatusCode::CONFLICT, "ALREADY_FRIENDS"),
            Self::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "Social request failed");
        }

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type SocialResult<T> = Result<T, SocialError>;
