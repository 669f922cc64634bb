//! Database Layer
//!
//! The [`CredentialStore`] trait is everything the account and friendship
//! logic needs from persistence. Each request runs inside one
//! [`UnitOfWork`] obtained from a [`Database`]; it is committed once when the
//! operation succeeds and rolled back otherwise (see [`finish`]).
//!
//! Two backends implement the traits: [`PgDatabase`] (`PostgreSQL` via sqlx)
//! and [`MemoryStore`] (in-process, used by tests and `DATABASE_URL=memory`).

mod memory;
mod models;
mod postgres;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgDatabase;

/// Errors raised by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness or integrity constraint rejected the write.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// The row to update or delete does not exist.
    #[error("Row not found")]
    Missing,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations used by the core.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    // Users
    async fn find_user(&self, filter: UserFilter<'_>) -> StoreResult<Option<User>>;
    async fn find_user_by_uid(&self, uid: Uuid) -> StoreResult<Option<User>>;
    /// Bulk lookup; unknown uids are skipped.
    async fn find_users_by_uids(&self, uids: &[Uuid]) -> StoreResult<Vec<User>>;
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    /// Delete a user together with every request and friend edge touching them.
    async fn delete_user(&self, uid: Uuid) -> StoreResult<()>;

    // Auth codes
    async fn insert_auth_code(&self, code: &AuthCode) -> StoreResult<()>;
    /// Most recently created code for (email, purpose), whatever its status.
    async fn latest_auth_code(
        &self,
        email: &str,
        purpose: CodePurpose,
    ) -> StoreResult<Option<AuthCode>>;
    async fn update_auth_code(&self, code: &AuthCode) -> StoreResult<()>;

    // Friend requests
    async fn insert_friend_request(&self, request: &FriendRequest) -> StoreResult<()>;
    async fn update_friend_request(&self, request: &FriendRequest) -> StoreResult<()>;
    /// Most recent request sender → receiver with the given status.
    async fn find_friend_request(
        &self,
        sender_uid: Uuid,
        receiver_uid: Uuid,
        status: RequestStatus,
    ) -> StoreResult<Option<FriendRequest>>;
    /// Requests sent or received by `uid` with the given status, oldest first.
    async fn list_friend_requests(
        &self,
        uid: Uuid,
        direction: RequestDirection,
        status: RequestStatus,
    ) -> StoreResult<Vec<FriendRequest>>;

    // Friends
    async fn insert_friend(&self, friend: &Friend) -> StoreResult<()>;
    async fn update_friend(&self, friend: &Friend) -> StoreResult<()>;
    /// Most recent edge between the two users (either orientation) with the given status.
    async fn find_friend(
        &self,
        a: Uuid,
        b: Uuid,
        status: FriendStatus,
    ) -> StoreResult<Option<Friend>>;
    /// Edges on either side of `uid` with the given status, oldest first.
    async fn list_friends(&self, uid: Uuid, status: FriendStatus) -> StoreResult<Vec<Friend>>;
}

/// A transactional view of the store.
#[async_trait]
pub trait UnitOfWork: CredentialStore {
    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Source of units of work.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// Decides whether a failed operation still commits its unit of work.
pub trait CommitPolicy {
    /// `true` when the error reflects a state change that must persist.
    fn commit_on_error(&self) -> bool {
        false
    }
}

/// Close a unit of work according to the operation result.
///
/// Success commits; failure rolls back unless the error's
/// [`CommitPolicy`] asks for a commit. A failing rollback is logged and the
/// original error returned.
pub async fn finish<T, E>(uow: Box<dyn UnitOfWork>, result: Result<T, E>) -> Result<T, E>
where
    E: CommitPolicy + From<StoreError>,
{
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) if err.commit_on_error() => {
            uow.commit().await?;
            Err(err)
        }
        Err(err) => {
            if let Err(e) = uow.rollback().await {
                warn!(error = %e, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Create `PostgreSQL` connection pool with health configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(20)
        // Prevent hanging requests on pool exhaustion
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Connect the backend named by `database_url`.
///
/// `memory` selects the in-process store; anything else is a `PostgreSQL` URL.
pub async fn connect(database_url: &str) -> Result<Arc<dyn Database>> {
    if database_url == "memory" {
        warn!("Using in-memory store, data is lost on shutdown");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(Arc::new(PgDatabase::new(pool)))
}
