//! `PostgreSQL` store tests.
//!
//! Require a running database (`DATABASE_URL`); run with `--ignored`.

use sqlx::PgPool;

use super::*;

fn template_user(username: &str) -> NewUser {
    NewUser {
        provider: Provider::Template,
        email: format!("{username}@example.com"),
        username: username.to_string(),
        hashed_password: Some("$argon2id$stub".into()),
        refresh_token: None,
        fullname: None,
        profile_picture: None,
    }
}

#[sqlx::test]
#[ignore = "requires PostgreSQL"]
async fn test_create_and_find_user(pool: PgPool) {
    let db = PgDatabase::new(pool);
    let uow = db.begin().await.unwrap();
    let user = uow.insert_user(template_user("alice")).await.unwrap();
    uow.commit().await.unwrap();

    let uow = db.begin().await.unwrap();
    let found = uow
        .find_user(UserFilter::email("alice@example.com").provider(Provider::Template).enabled())
        .await
        .unwrap()
        .expect("user not found");
    assert_eq!(found.uid, user.uid);
    assert_eq!(found.account_view, "profile");
    assert!(found.is_sidebar_open);

    let by_uid = uow.find_user_by_uid(user.uid).await.unwrap();
    assert_eq!(by_uid.map(|u| u.username), Some("alice".to_string()));
}

#[sqlx::test]
#[ignore = "requires PostgreSQL"]
async fn test_username_uniqueness(pool: PgPool) {
    let db = PgDatabase::new(pool);
    let uow = db.begin().await.unwrap();
    uow.insert_user(template_user("alice")).await.unwrap();

    let mut duplicate = template_user("alice");
    duplicate.email = "other@example.com".into();
    let err = uow.insert_user(duplicate).await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint(ref name) if name == "users_username_key"));
}

#[sqlx::test]
#[ignore = "requires PostgreSQL"]
async fn test_rollback_discards_writes(pool: PgPool) {
    let db = PgDatabase::new(pool);
    let uow = db.begin().await.unwrap();
    uow.insert_user(template_user("ghost")).await.unwrap();
    uow.rollback().await.unwrap();

    let uow = db.begin().await.unwrap();
    assert!(uow
        .find_user(UserFilter::username("ghost"))
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires PostgreSQL"]
async fn test_latest_auth_code_wins(pool: PgPool) {
    let db = PgDatabase::new(pool);
    let uow = db.begin().await.unwrap();
    let now = chrono::Utc::now();
    for (offset, code) in [(0, "aaaaaa"), (1, "bbbbbb")] {
        uow.insert_auth_code(&AuthCode {
            id: Uuid::now_v7(),
            email: "alice@example.com".into(),
            code: code.into(),
            purpose: CodePurpose::Verify,
            status: CodeStatus::Pending,
            created_at: now + chrono::Duration::seconds(offset),
            expires_at: now + chrono::Duration::minutes(10),
            used_at: None,
        })
        .await
        .unwrap();
    }

    let latest = uow
        .latest_auth_code("alice@example.com", CodePurpose::Verify)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.code, "bbbbbb");
    assert!(uow
        .latest_auth_code("alice@example.com", CodePurpose::Recovery)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires PostgreSQL"]
async fn test_pending_pair_unique_in_either_direction(pool: PgPool) {
    let db = PgDatabase::new(pool);
    let uow = db.begin().await.unwrap();
    let a = uow.insert_user(template_user("alice")).await.unwrap();
    let b = uow.insert_user(template_user("bob")).await.unwrap();

    uow.insert_friend_request(&FriendRequest::pending(a.uid, b.uid))
        .await
        .unwrap();
    let err = uow
        .insert_friend_request(&FriendRequest::pending(b.uid, a.uid))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
}

#[sqlx::test]
#[ignore = "requires PostgreSQL"]
async fn test_friend_lookup_either_orientation_and_cascade(pool: PgPool) {
    let db = PgDatabase::new(pool);
    let uow = db.begin().await.unwrap();
    let a = uow.insert_user(template_user("alice")).await.unwrap();
    let b = uow.insert_user(template_user("bob")).await.unwrap();
    let friend = Friend::confirmed(b.uid, a.uid);
    uow.insert_friend(&friend).await.unwrap();

    let found = uow
        .find_friend(a.uid, b.uid, FriendStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(found.map(|f| f.id), Some(friend.id));
    assert_eq!(
        uow.list_friends(a.uid, FriendStatus::Confirmed)
            .await
            .unwrap()
            .len(),
        1
    );

    uow.delete_user(a.uid).await.unwrap();
    assert!(uow
        .list_friends(b.uid, FriendStatus::Confirmed)
        .await
        .unwrap()
        .is_empty());
}
