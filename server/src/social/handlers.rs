use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use validator::Validate;

use super::friends;
use super::types::{FriendRead, FriendRequestRead, SocialError, SocialResult, UsernameForm};
use crate::api::AppState;
use crate::auth::cookies::session_from;
use crate::auth::UserRead;
use crate::db::{finish, FriendStatus, RequestStatus};

/// Optional `?status=` filter for request lists
#[derive(Debug, Default, Deserialize)]
pub struct RequestStatusQuery {
    pub status: Option<RequestStatus>,
}

/// Optional `?status=` filter for the friend list
#[derive(Debug, Default, Deserialize)]
pub struct FriendStatusQuery {
    pub status: Option<FriendStatus>,
}

/// Run one friend action for the cookie session and answer with the caller.
macro_rules! friend_action {
    ($state:expr, $jar:expr, $body:expr, $action:path) => {{
        let session = session_from(&$jar);
        let uow = $state.db.begin().await?;
        let result = async {
            let me = session
                .authenticate($state.accounts.resolver(), &*uow)
                .await?;
            $body
                .validate()
                .map_err(|e| SocialError::Validation(e.to_string()))?;
            $action(&*uow, &me, &$body.username).await?;
            Ok::<_, SocialError>(me)
        }
        .await;
        let me = finish(uow, result).await?;
        Ok(Json(UserRead::from(me)))
    }};
}

/// POST /friends/send-request
#[tracing::instrument(skip(state, jar, body), fields(target = %body.username))]
pub async fn send_request(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<UsernameForm>,
) -> SocialResult<Json<UserRead>> {
    friend_action!(state, jar, body, friends::send_request)
}

/// POST /friends/revert-request
#[tracing::instrument(skip(state, jar, body), fields(target = %body.username))]
pub async fn revert_request(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<UsernameForm>,
) -> SocialResult<Json<UserRead>> {
    friend_action!(state, jar, body, friends::revert_request)
}

/// POST /friends/accept-request
#[tracing::instrument(skip(state, jar, body), fields(target = %body.username))]
pub async fn accept_request(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<UsernameForm>,
) -> SocialResult<Json<UserRead>> {
    friend_action!(state, jar, body, friends::accept_request)
}

/// POST /friends/decline-request
#[tracing::instrument(skip(state, jar, body), fields(target = %body.username))]
pub async fn decline_request(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<UsernameForm>,
) -> SocialResult<Json<UserRead>> {
    friend_action!(state, jar, body, friends::decline_request)
}

/// POST /friends/delete
#[tracing::instrument(skip(state, jar, body), fields(target = %body.username))]
pub async fn delete_friend(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<UsernameForm>,
) -> SocialResult<Json<UserRead>> {
    friend_action!(state, jar, body, friends::delete_friend)
}

/// GET /friends/requests/sent
/// Requests the caller sent, pending unless `?status=` says otherwise
#[tracing::instrument(skip(state, jar))]
pub async fn sent_requests(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<RequestStatusQuery>,
) -> SocialResult<Json<Vec<FriendRequestRead>>> {
    let status = query.status.unwrap_or(RequestStatus::Pending);
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = async {
        let me = session.authenticate(state.accounts.resolver(), &*uow).await?;
        friends::sent_requests(&*uow, &me, status).await
    }
    .await;
    let rows = finish(uow, result).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /friends/requests/incoming
/// Requests the caller received, pending unless `?status=` says otherwise
#[tracing::instrument(skip(state, jar))]
pub async fn incoming_requests(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<RequestStatusQuery>,
) -> SocialResult<Json<Vec<FriendRequestRead>>> {
    let status = query.status.unwrap_or(RequestStatus::Pending);
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = async {
        let me = session.authenticate(state.accounts.resolver(), &*uow).await?;
        friends::incoming_requests(&*uow, &me, status).await
    }
    .await;
    let rows = finish(uow, result).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// GET /friends/
/// Confirmed friends unless `?status=` says otherwise
#[tracing::instrument(skip(state, jar))]
pub async fn list_friends(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<FriendStatusQuery>,
) -> SocialResult<Json<Vec<FriendRead>>> {
    let status = query.status.unwrap_or(FriendStatus::Confirmed);
    let session = session_from(&jar);
    let uow = state.db.begin().await?;
    let result = async {
        let me = session.authenticate(state.accounts.resolver(), &*uow).await?;
        friends::friends(&*uow, &me, status).await
    }
    .await;
    let rows = finish(uow, result).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}
