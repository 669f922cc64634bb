//! `PostgreSQL` backend.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

use super::{
    AuthCode, CodePurpose, CredentialStore, Database, Friend, FriendRequest, FriendStatus, NewUser,
    RequestDirection, RequestStatus, StoreError, StoreResult, UnitOfWork, User, UserFilter,
    UserKey,
};

/// Log a failed query with context and classify the error.
macro_rules! db_error {
    ($query:expr, $($field:tt)*) => {
        |e: sqlx::Error| {
            error!(query = $query, $($field)*, error = %e, "Database query failed");
            classify(e)
        }
    };
}

fn classify(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::Constraint(db_err.constraint().unwrap_or("unique").to_string())
        }
        sqlx::Error::Database(ref db_err) if db_err.is_check_violation() => {
            StoreError::Constraint(db_err.constraint().unwrap_or("check").to_string())
        }
        other => StoreError::Database(other),
    }
}

fn expect_one(rows: u64) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::Missing)
    } else {
        Ok(())
    }
}

/// Pool-backed [`Database`].
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(db_error!("begin", pool = "main"))?;
        Ok(Box::new(PgUnitOfWork { tx: Mutex::new(tx) }))
    }
}

/// One transaction.
pub struct PgUnitOfWork {
    tx: Mutex<Transaction<'static, Postgres>>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .into_inner()
            .commit()
            .await
            .map_err(db_error!("commit", tx = "uow"))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .into_inner()
            .rollback()
            .await
            .map_err(db_error!("rollback", tx = "uow"))
    }
}

#[async_trait]
impl CredentialStore for PgUnitOfWork {
    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    async fn find_user(&self, filter: UserFilter<'_>) -> StoreResult<Option<User>> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT * FROM users WHERE ");
        match filter.key {
            UserKey::Email(email) => qb.push("email = ").push_bind(email),
            UserKey::Username(username) => qb.push("username = ").push_bind(username),
        };
        if let Some(provider) = filter.provider {
            qb.push(" AND provider = ").push_bind(provider);
        }
        if let Some(disabled) = filter.disabled {
            qb.push(" AND disabled = ").push_bind(disabled);
        }
        qb.push(" ORDER BY join_date LIMIT 1");

        let mut tx = self.tx.lock().await;
        qb.build_query_as::<User>()
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error!("find_user", filter = ?filter.key))
    }

    async fn find_user_by_uid(&self, uid: Uuid) -> StoreResult<Option<User>> {
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error!("find_user_by_uid", uid = %uid))
    }

    async fn find_users_by_uids(&self, uids: &[Uuid]) -> StoreResult<Vec<User>> {
        if uids.is_empty() {
            return Ok(vec![]);
        }
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE uid = ANY($1)")
            .bind(uids)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_error!("find_users_by_uids", count = uids.len()))
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let user = user.into_user();
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, User>(
            r"
            INSERT INTO users (
                uid, provider, email, username, hashed_password, refresh_token, disabled,
                fullname, profile_picture, account_view, is_sidebar_open, join_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            ",
        )
        .bind(user.uid)
        .bind(user.provider)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.hashed_password)
        .bind(&user.refresh_token)
        .bind(user.disabled)
        .bind(&user.fullname)
        .bind(&user.profile_picture)
        .bind(&user.account_view)
        .bind(user.is_sidebar_open)
        .bind(user.join_date)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error!("insert_user", username = %user.username))
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(
            r"
            UPDATE users SET
                email = $2, username = $3, hashed_password = $4, refresh_token = $5,
                disabled = $6, fullname = $7, profile_picture = $8, account_view = $9,
                is_sidebar_open = $10
            WHERE uid = $1
            ",
        )
        .bind(user.uid)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.hashed_password)
        .bind(&user.refresh_token)
        .bind(user.disabled)
        .bind(&user.fullname)
        .bind(&user.profile_picture)
        .bind(&user.account_view)
        .bind(user.is_sidebar_open)
        .execute(&mut **tx)
        .await
        .map_err(db_error!("update_user", uid = %user.uid))?;
        expect_one(result.rows_affected())
    }

    async fn delete_user(&self, uid: Uuid) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        // friend_requests and friends cascade.
        let result = sqlx::query("DELETE FROM users WHERE uid = $1")
            .bind(uid)
            .execute(&mut **tx)
            .await
            .map_err(db_error!("delete_user", uid = %uid))?;
        expect_one(result.rows_affected())
    }

    // ------------------------------------------------------------------------
    // Auth codes
    // ------------------------------------------------------------------------

    async fn insert_auth_code(&self, code: &AuthCode) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        sqlx::query(
            r"
            INSERT INTO auth_codes (id, email, code, purpose, status, created_at, expires_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(code.id)
        .bind(&code.email)
        .bind(&code.code)
        .bind(code.purpose)
        .bind(code.status)
        .bind(code.created_at)
        .bind(code.expires_at)
        .bind(code.used_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error!("insert_auth_code", email = %code.email))?;
        Ok(())
    }

    async fn latest_auth_code(
        &self,
        email: &str,
        purpose: CodePurpose,
    ) -> StoreResult<Option<AuthCode>> {
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, AuthCode>(
            r"
            SELECT * FROM auth_codes
            WHERE email = $1 AND purpose = $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(email)
        .bind(purpose)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error!("latest_auth_code", email = %email))
    }

    async fn update_auth_code(&self, code: &AuthCode) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let result =
            sqlx::query("UPDATE auth_codes SET status = $2, used_at = $3 WHERE id = $1")
                .bind(code.id)
                .bind(code.status)
                .bind(code.used_at)
                .execute(&mut **tx)
                .await
                .map_err(db_error!("update_auth_code", id = %code.id))?;
        expect_one(result.rows_affected())
    }

    // ------------------------------------------------------------------------
    // Friend requests
    // ------------------------------------------------------------------------

    async fn insert_friend_request(&self, request: &FriendRequest) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        sqlx::query(
            r"
            INSERT INTO friend_requests (id, sender_uid, receiver_uid, status, request_date)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(request.id)
        .bind(request.sender_uid)
        .bind(request.receiver_uid)
        .bind(request.status)
        .bind(request.request_date)
        .execute(&mut **tx)
        .await
        .map_err(db_error!("insert_friend_request", sender = %request.sender_uid, receiver = %request.receiver_uid))?;
        Ok(())
    }

    async fn update_friend_request(&self, request: &FriendRequest) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let result = sqlx::query("UPDATE friend_requests SET status = $2 WHERE id = $1")
            .bind(request.id)
            .bind(request.status)
            .execute(&mut **tx)
            .await
            .map_err(db_error!("update_friend_request", id = %request.id))?;
        expect_one(result.rows_affected())
    }

    async fn find_friend_request(
        &self,
        sender_uid: Uuid,
        receiver_uid: Uuid,
        status: RequestStatus,
    ) -> StoreResult<Option<FriendRequest>> {
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, FriendRequest>(
            r"
            SELECT * FROM friend_requests
            WHERE sender_uid = $1 AND receiver_uid = $2 AND status = $3
            ORDER BY request_date DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(sender_uid)
        .bind(receiver_uid)
        .bind(status)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error!("find_friend_request", sender = %sender_uid, receiver = %receiver_uid))
    }

    async fn list_friend_requests(
        &self,
        uid: Uuid,
        direction: RequestDirection,
        status: RequestStatus,
    ) -> StoreResult<Vec<FriendRequest>> {
        let sql = match direction {
            RequestDirection::Sent => {
                "SELECT * FROM friend_requests WHERE sender_uid = $1 AND status = $2 ORDER BY request_date, id"
            }
            RequestDirection::Incoming => {
                "SELECT * FROM friend_requests WHERE receiver_uid = $1 AND status = $2 ORDER BY request_date, id"
            }
        };
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, FriendRequest>(sql)
            .bind(uid)
            .bind(status)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_error!("list_friend_requests", uid = %uid))
    }

    // ------------------------------------------------------------------------
    // Friends
    // ------------------------------------------------------------------------

    async fn insert_friend(&self, friend: &Friend) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        sqlx::query(
            r"
            INSERT INTO friends (id, friend_1_uid, friend_2_uid, status, friendship_date)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(friend.id)
        .bind(friend.friend_1_uid)
        .bind(friend.friend_2_uid)
        .bind(friend.status)
        .bind(friend.friendship_date)
        .execute(&mut **tx)
        .await
        .map_err(db_error!("insert_friend", friend_1 = %friend.friend_1_uid, friend_2 = %friend.friend_2_uid))?;
        Ok(())
    }

    async fn update_friend(&self, friend: &Friend) -> StoreResult<()> {
        let mut tx = self.tx.lock().await;
        let result = sqlx::query("UPDATE friends SET status = $2 WHERE id = $1")
            .bind(friend.id)
            .bind(friend.status)
            .execute(&mut **tx)
            .await
            .map_err(db_error!("update_friend", id = %friend.id))?;
        expect_one(result.rows_affected())
    }

    async fn find_friend(
        &self,
        a: Uuid,
        b: Uuid,
        status: FriendStatus,
    ) -> StoreResult<Option<Friend>> {
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, Friend>(
            r"
            SELECT * FROM friends
            WHERE status = $3
              AND ((friend_1_uid = $1 AND friend_2_uid = $2)
                OR (friend_1_uid = $2 AND friend_2_uid = $1))
            ORDER BY friendship_date DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(a)
        .bind(b)
        .bind(status)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error!("find_friend", a = %a, b = %b))
    }

    async fn list_friends(&self, uid: Uuid, status: FriendStatus) -> StoreResult<Vec<Friend>> {
        let mut tx = self.tx.lock().await;
        sqlx::query_as::<_, Friend>(
            r"
            SELECT * FROM friends
            WHERE (friend_1_uid = $1 OR friend_2_uid = $1) AND status = $2
            ORDER BY friendship_date, id
            ",
        )
        .bind(uid)
        .bind(status)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_error!("list_friends", uid = %uid))
    }
}
