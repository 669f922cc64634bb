//! In-process store.
//!
//! A unit of work reads from a snapshot of the shared state and logs its
//! writes. Commit replays the log against the live state under its lock, so
//! constraints are checked against every committed write; a violation fails
//! the commit and leaves the shared state untouched. Constraints mirror the
//! `PostgreSQL` schema.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    AuthCode, CodePurpose, CredentialStore, Database, Friend, FriendRequest, FriendStatus, NewUser,
    RequestDirection, RequestStatus, StoreError, StoreResult, UnitOfWork, User, UserFilter,
};

#[derive(Debug, Clone, Default)]
struct State {
    users: Vec<User>,
    auth_codes: Vec<AuthCode>,
    friend_requests: Vec<FriendRequest>,
    friends: Vec<Friend>,
}

/// One write, applied to the working snapshot at once and to the shared
/// state again on commit.
#[derive(Debug, Clone)]
enum Write {
    InsertUser(User),
    UpdateUser(User),
    DeleteUser(Uuid),
    InsertAuthCode(AuthCode),
    UpdateAuthCode(AuthCode),
    InsertFriendRequest(FriendRequest),
    UpdateFriendRequest(FriendRequest),
    InsertFriend(Friend),
    UpdateFriend(Friend),
}

fn replace<T: Clone>(rows: &mut [T], row: &T, same: impl Fn(&T) -> bool) -> StoreResult<()> {
    let slot = rows.iter_mut().find(|r| same(r)).ok_or(StoreError::Missing)?;
    *slot = row.clone();
    Ok(())
}

fn same_pair(a1: Uuid, b1: Uuid, a2: Uuid, b2: Uuid) -> bool {
    (a1 == a2 && b1 == b2) || (a1 == b2 && b1 == a2)
}

impl State {
    fn check_user(&self, user: &User) -> StoreResult<()> {
        for other in self.users.iter().filter(|u| u.uid != user.uid) {
            if other.username == user.username {
                return Err(StoreError::Constraint("users_username_key".into()));
            }
            if other.provider == user.provider && other.email == user.email {
                return Err(StoreError::Constraint("users_provider_email_key".into()));
            }
        }
        if user.username.is_empty() {
            return Err(StoreError::Constraint("users_username_check".into()));
        }
        Ok(())
    }

    fn check_request(&self, request: &FriendRequest) -> StoreResult<()> {
        if request.status != RequestStatus::Pending {
            return Ok(());
        }
        let clash = self.friend_requests.iter().any(|r| {
            r.id != request.id
                && r.status == RequestStatus::Pending
                && same_pair(r.sender_uid, r.receiver_uid, request.sender_uid, request.receiver_uid)
        });
        if clash {
            return Err(StoreError::Constraint("uq_friend_requests_pending_pair".into()));
        }
        Ok(())
    }

    fn check_friend(&self, friend: &Friend) -> StoreResult<()> {
        if friend.status != FriendStatus::Confirmed {
            return Ok(());
        }
        let clash = self.friends.iter().any(|f| {
            f.id != friend.id
                && f.status == FriendStatus::Confirmed
                && same_pair(f.friend_1_uid, f.friend_2_uid, friend.friend_1_uid, friend.friend_2_uid)
        });
        if clash {
            return Err(StoreError::Constraint("uq_friends_confirmed_pair".into()));
        }
        Ok(())
    }

    fn apply(&mut self, write: &Write) -> StoreResult<()> {
        match write {
            Write::InsertUser(user) => {
                self.check_user(user)?;
                self.users.push(user.clone());
            }
            Write::UpdateUser(user) => {
                self.check_user(user)?;
                replace(&mut self.users, user, |u| u.uid == user.uid)?;
            }
            Write::DeleteUser(uid) => {
                let uid = *uid;
                let before = self.users.len();
                self.users.retain(|u| u.uid != uid);
                if self.users.len() == before {
                    return Err(StoreError::Missing);
                }
                self.friend_requests
                    .retain(|r| r.sender_uid != uid && r.receiver_uid != uid);
                self.friends.retain(|f| !f.involves(uid));
            }
            Write::InsertAuthCode(code) => self.auth_codes.push(code.clone()),
            Write::UpdateAuthCode(code) => {
                replace(&mut self.auth_codes, code, |c| c.id == code.id)?;
            }
            Write::InsertFriendRequest(request) => {
                self.check_request(request)?;
                self.friend_requests.push(request.clone());
            }
            Write::UpdateFriendRequest(request) => {
                self.check_request(request)?;
                replace(&mut self.friend_requests, request, |r| r.id == request.id)?;
            }
            Write::InsertFriend(friend) => {
                self.check_friend(friend)?;
                self.friends.push(friend.clone());
            }
            Write::UpdateFriend(friend) => {
                self.check_friend(friend)?;
                replace(&mut self.friends, friend, |f| f.id == friend.id)?;
            }
        }
        Ok(())
    }
}

/// Shared in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> State {
        lock(&self.state).clone()
    }

    /// Every stored auth code for `email`, oldest first.
    #[must_use]
    pub fn auth_codes_for(&self, email: &str) -> Vec<AuthCode> {
        lock(&self.state)
            .auth_codes
            .iter()
            .filter(|c| c.email == email)
            .cloned()
            .collect()
    }

    /// Every stored friend request, oldest first.
    #[must_use]
    pub fn all_friend_requests(&self) -> Vec<FriendRequest> {
        lock(&self.state).friend_requests.clone()
    }

    /// Every stored friend edge, oldest first.
    #[must_use]
    pub fn all_friends(&self) -> Vec<Friend> {
        lock(&self.state).friends.clone()
    }

    /// Look up a user by uid without opening a unit of work.
    #[must_use]
    pub fn user(&self, uid: Uuid) -> Option<User> {
        lock(&self.state).users.iter().find(|u| u.uid == uid).cloned()
    }

    /// Overwrite a stored user directly, e.g. to disable an account.
    pub fn put_user(&self, user: User) {
        let mut state = lock(&self.state);
        if let Some(slot) = state.users.iter_mut().find(|u| u.uid == user.uid) {
            *slot = user;
        } else {
            state.users.push(user);
        }
    }
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves plain data behind; keep serving it.
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Database for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            shared: Arc::clone(&self.state),
            working: Mutex::new(Working {
                state: self.snapshot(),
                log: Vec::new(),
            }),
        }))
    }
}

#[derive(Debug, Default)]
struct Working {
    /// Snapshot plus this unit of work's own writes.
    state: State,
    /// Writes in order, replayed on commit.
    log: Vec<Write>,
}

/// Snapshot-based unit of work over a [`MemoryStore`].
pub struct MemoryUnitOfWork {
    shared: Arc<Mutex<State>>,
    working: Mutex<Working>,
}

impl MemoryUnitOfWork {
    fn state(&self) -> MappedGuard<'_> {
        MappedGuard(lock(&self.working))
    }

    fn write(&self, write: Write) -> StoreResult<()> {
        let mut working = lock(&self.working);
        working.state.apply(&write)?;
        working.log.push(write);
        Ok(())
    }
}

/// Read access to the working snapshot.
struct MappedGuard<'a>(MutexGuard<'a, Working>);

impl std::ops::Deref for MappedGuard<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        &self.0.state
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let working = self
            .working
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Replay against the live state so concurrent commits are kept and
        // constraints see them.
        let mut shared = lock(&self.shared);
        let mut next = shared.clone();
        for write in &working.log {
            next.apply(write)?;
        }
        *shared = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryUnitOfWork {
    async fn find_user(&self, filter: UserFilter<'_>) -> StoreResult<Option<User>> {
        Ok(self.state().users.iter().find(|u| filter.matches(u)).cloned())
    }

    async fn find_user_by_uid(&self, uid: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state().users.iter().find(|u| u.uid == uid).cloned())
    }

    async fn find_users_by_uids(&self, uids: &[Uuid]) -> StoreResult<Vec<User>> {
        Ok(self
            .state()
            .users
            .iter()
            .filter(|u| uids.contains(&u.uid))
            .cloned()
            .collect())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let user = user.into_user();
        self.write(Write::InsertUser(user.clone()))?;
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.write(Write::UpdateUser(user.clone()))
    }

    async fn delete_user(&self, uid: Uuid) -> StoreResult<()> {
        self.write(Write::DeleteUser(uid))
    }

    async fn insert_auth_code(&self, code: &AuthCode) -> StoreResult<()> {
        self.write(Write::InsertAuthCode(code.clone()))
    }

    async fn latest_auth_code(
        &self,
        email: &str,
        purpose: CodePurpose,
    ) -> StoreResult<Option<AuthCode>> {
        // Insertion order is creation order.
        Ok(self
            .state()
            .auth_codes
            .iter()
            .rev()
            .find(|c| c.email == email && c.purpose == purpose)
            .cloned())
    }

    async fn update_auth_code(&self, code: &AuthCode) -> StoreResult<()> {
        self.write(Write::UpdateAuthCode(code.clone()))
    }

    async fn insert_friend_request(&self, request: &FriendRequest) -> StoreResult<()> {
        self.write(Write::InsertFriendRequest(request.clone()))
    }

    async fn update_friend_request(&self, request: &FriendRequest) -> StoreResult<()> {
        self.write(Write::UpdateFriendRequest(request.clone()))
    }

    async fn find_friend_request(
        &self,
        sender_uid: Uuid,
        receiver_uid: Uuid,
        status: RequestStatus,
    ) -> StoreResult<Option<FriendRequest>> {
        Ok(self
            .state()
            .friend_requests
            .iter()
            .rev()
            .find(|r| {
                r.sender_uid == sender_uid && r.receiver_uid == receiver_uid && r.status == status
            })
            .cloned())
    }

    async fn list_friend_requests(
        &self,
        uid: Uuid,
        direction: RequestDirection,
        status: RequestStatus,
    ) -> StoreResult<Vec<FriendRequest>> {
        Ok(self
            .state()
            .friend_requests
            .iter()
            .filter(|r| r.status == status)
            .filter(|r| match direction {
                RequestDirection::Sent => r.sender_uid == uid,
                RequestDirection::Incoming => r.receiver_uid == uid,
            })
            .cloned()
            .collect())
    }

    async fn insert_friend(&self, friend: &Friend) -> StoreResult<()> {
        self.write(Write::InsertFriend(friend.clone()))
    }

    async fn update_friend(&self, friend: &Friend) -> StoreResult<()> {
        self.write(Write::UpdateFriend(friend.clone()))
    }

    async fn find_friend(
        &self,
        a: Uuid,
        b: Uuid,
        status: FriendStatus,
    ) -> StoreResult<Option<Friend>> {
        Ok(self
            .state()
            .friends
            .iter()
            .rev()
            .find(|f| f.status == status && same_pair(f.friend_1_uid, f.friend_2_uid, a, b))
            .cloned())
    }

    async fn list_friends(&self, uid: Uuid, status: FriendStatus) -> StoreResult<Vec<Friend>> {
        Ok(self
            .state()
            .friends
            .iter()
            .filter(|f| f.status == status && f.involves(uid))
            .cloned()
            .collect())
    }
}
