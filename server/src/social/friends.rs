//! Friendship State Machine
//!
//! Requests are directed edges `sender -> receiver`; friendships are
//! undirected edges created by accepting a request. Every action looks its
//! edge up by (pair, status) and moves it through the transition methods on
//! [`FriendRequest`] and [`Friend`].

use std::collections::HashMap;

use tracing::info;
use uuid::Uuid;

use super::types::{SocialError, SocialResult};
use crate::db::{
    CredentialStore, Friend, FriendRequest, FriendStatus, RequestDirection, RequestOutcome,
    RequestStatus, User, UserFilter,
};

/// Resolve the other user of an action.
async fn target<S>(store: &S, me: &User, username: &str, self_message: &str) -> SocialResult<User>
where
    S: CredentialStore + ?Sized,
{
    if username.is_empty() {
        return Err(SocialError::Validation("Username is empty".to_string()));
    }
    if username == me.username {
        return Err(SocialError::Validation(self_message.to_string()));
    }

    store
        .find_user(UserFilter::username(username).enabled())
        .await?
        .ok_or(SocialError::UserNotFound)
}

async fn confirmed_between<S>(store: &S, a: Uuid, b: Uuid) -> SocialResult<Option<Friend>>
where
    S: CredentialStore + ?Sized,
{
    Ok(store.find_friend(a, b, FriendStatus::Confirmed).await?)
}

async fn pending_request<S>(store: &S, sender: Uuid, receiver: Uuid) -> SocialResult<Option<FriendRequest>>
where
    S: CredentialStore + ?Sized,
{
    Ok(store
        .find_friend_request(sender, receiver, RequestStatus::Pending)
        .await?)
}

/// Send a friend request to `username`.
pub async fn send_request<S>(store: &S, me: &User, username: &str) -> SocialResult<FriendRequest>
where
    S: CredentialStore + ?Sized,
{
    let other = target(store, me, username, "Cannot send request to yourself").await?;

    if pending_request(store, me.uid, other.uid).await?.is_some() {
        return Err(SocialError::RequestAlreadySent);
    }
    if pending_request(store, other.uid, me.uid).await?.is_some() {
        return Err(SocialError::RequestAlreadyReceived);
    }
    if confirmed_between(store, me.uid, other.uid).await?.is_some() {
        return Err(SocialError::AlreadyFriends);
    }

    let request = FriendRequest::pending(me.uid, other.uid);
    store.insert_friend_request(&request).await?;

    info!(sender = %me.uid, receiver = %other.uid, "Friend request sent");
    Ok(request)
}

/// Withdraw a pending request previously sent to `username`.
pub async fn revert_request<S>(store: &S, me: &User, username: &str) -> SocialResult<FriendRequest>
where
    S: CredentialStore + ?Sized,
{
    let other = target(store, me, username, "Cannot send request to yourself").await?;

    let mut request = pending_request(store, me.uid, other.uid)
        .await?
        .ok_or(SocialError::RequestNotFound)?;
    if confirmed_between(store, me.uid, other.uid).await?.is_some() {
        return Err(SocialError::AlreadyFriends);
    }

    request.close(RequestOutcome::Reverted)?;
    store.update_friend_request(&request).await?;

    info!(sender = %me.uid, receiver = %other.uid, "Friend request reverted");
    Ok(request)
}

async fn answer_request<S>(
    store: &S,
    me: &User,
    other: &User,
    outcome: RequestOutcome,
) -> SocialResult<FriendRequest>
where
    S: CredentialStore + ?Sized,
{
    let mut request = pending_request(store, other.uid, me.uid)
        .await?
        .ok_or(SocialError::RequestNotFound)?;
    if confirmed_between(store, me.uid, other.uid).await?.is_some() {
        return Err(SocialError::AlreadyFriends);
    }

    request.close(outcome)?;
    store.update_friend_request(&request).await?;
    Ok(request)
}

/// Accept the pending request from `username`, creating the friendship.
pub async fn accept_request<S>(store: &S, me: &User, username: &str) -> SocialResult<Friend>
where
    S: CredentialStore + ?Sized,
{
    let other = target(store, me, username, "Cannot accept request from yourself").await?;
    answer_request(store, me, &other, RequestOutcome::Accepted).await?;

    let friend = Friend::confirmed(me.uid, other.uid);
    store.insert_friend(&friend).await?;

    info!(accepter = %me.uid, requester = %other.uid, "Friend request accepted");
    Ok(friend)
}

/// Decline the pending request from `username`.
pub async fn decline_request<S>(store: &S, me: &User, username: &str) -> SocialResult<FriendRequest>
where
    S: CredentialStore + ?Sized,
{
    let other = target(store, me, username, "Cannot decline request from yourself").await?;
    let request = answer_request(store, me, &other, RequestOutcome::Declined).await?;

    info!(receiver = %me.uid, sender = %other.uid, "Friend request declined");
    Ok(request)
}

/// End the friendship with `username`.
pub async fn delete_friend<S>(store: &S, me: &User, username: &str) -> SocialResult<Friend>
where
    S: CredentialStore + ?Sized,
{
    let other = target(store, me, username, "Cannot delete yourself as a friend").await?;

    let mut friend = confirmed_between(store, me.uid, other.uid)
        .await?
        .ok_or(SocialError::FriendNotFound)?;
    friend.remove()?;
    store.update_friend(&friend).await?;

    info!(uid = %me.uid, friend = %other.uid, "Friend deleted");
    Ok(friend)
}

// ============================================================================
// Queries
// ============================================================================

/// Pair each edge with the user at its other end.
///
/// Edges whose counterpart no longer exists are skipped.
async fn with_counterparts<S, E>(
    store: &S,
    edges: Vec<E>,
    counterpart: impl Fn(&E) -> Uuid,
) -> SocialResult<Vec<(User, E)>>
where
    S: CredentialStore + ?Sized,
{
    let uids: Vec<Uuid> = edges.iter().map(&counterpart).collect();
    let users: HashMap<Uuid, User> = store
        .find_users_by_uids(&uids)
        .await?
        .into_iter()
        .map(|user| (user.uid, user))
        .collect();

    Ok(edges
        .into_iter()
        .filter_map(|edge| {
            let user = users.get(&counterpart(&edge))?.clone();
            Some((user, edge))
        })
        .collect())
}

/// Requests `user` sent, with the receiver.
pub async fn sent_requests<S>(
    store: &S,
    user: &User,
    status: RequestStatus,
) -> SocialResult<Vec<(User, FriendRequest)>>
where
    S: CredentialStore + ?Sized,
{
    let edges = store
        .list_friend_requests(user.uid, RequestDirection::Sent, status)
        .await?;
    with_counterparts(store, edges, |r| r.receiver_uid).await
}

/// Requests `user` received, with the sender.
pub async fn incoming_requests<S>(
    store: &S,
    user: &User,
    status: RequestStatus,
) -> SocialResult<Vec<(User, FriendRequest)>>
where
    S: CredentialStore + ?Sized,
{
    let edges = store
        .list_friend_requests(user.uid, RequestDirection::Incoming, status)
        .await?;
    with_counterparts(store, edges, |r| r.sender_uid).await
}

/// Friendships of `user`, with the friend.
pub async fn friends<S>(
    store: &S,
    user: &User,
    status: FriendStatus,
) -> SocialResult<Vec<(User, Friend)>>
where
    S: CredentialStore + ?Sized,
{
    let uid = user.uid;
    let edges = store.list_friends(uid, status).await?;
    with_counterparts(store, edges, move |f| f.counterpart(uid)).await
}
