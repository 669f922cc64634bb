pub mod friends;
mod handlers;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::AppState;

pub use types::{FriendRead, FriendRequestRead, SocialError, SocialResult, UsernameForm};

/// Create the social router with friend management endpoints
pub fn router() -> Router<AppState> {
    Router::new()
        // Friend requests
        .route("/friends/send-request", post(handlers::send_request))
        .route("/friends/revert-request", post(handlers::revert_request))
        .route("/friends/accept-request", post(handlers::accept_request))
        .route("/friends/decline-request", post(handlers::decline_request))
        .route("/friends/requests/sent", get(handlers::sent_requests))
        .route("/friends/requests/incoming", get(handlers::incoming_requests))
        // Friends
        .route("/friends/", get(handlers::list_friends))
        .route("/friends/delete", post(handlers::delete_friend))
}
