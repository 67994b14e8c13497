use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewSession, NewUser, SessionRecord, User};

/// Which unique column a conflicting insert collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unique constraint violated on {0:?}")]
    Conflict(UniqueField),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl RepoError {
    /// Maps Postgres unique violations (SQLSTATE 23505) onto `Conflict`.
    fn from_sqlx(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                match db.constraint() {
                    Some("users_username_key") => return Self::Conflict(UniqueField::Username),
                    Some("users_email_key") => return Self::Conflict(UniqueField::Email),
                    _ => {}
                }
            }
        }
        Self::Database(e)
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// An identifier containing `@` matches the lower-cased email, anything
    /// else the username verbatim. Usernames cannot contain `@`, so at most one
    /// row matches.
    async fn find_by_username_or_email(&self, identifier: &str) -> RepoResult<Option<User>>;
    async fn find_by_id(&self, id: i64) -> RepoResult<Option<User>>;
    async fn exists_username(&self, username: &str) -> RepoResult<bool>;
    async fn exists_email(&self, email: &str) -> RepoResult<bool>;
    async fn insert(&self, user: NewUser) -> RepoResult<User>;
    async fn update_last_login(&self, id: i64, at: OffsetDateTime) -> RepoResult<()>;
    async fn update_password(&self, id: i64, password_hash: &str) -> RepoResult<()>;
    async fn deactivate(&self, id: i64) -> RepoResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: NewSession) -> RepoResult<SessionRecord>;
    /// Returns the session only if it is neither revoked nor expired at `now`.
    async fn find_active(&self, id: Uuid, now: OffsetDateTime) -> RepoResult<Option<SessionRecord>>;
    async fn revoke(&self, id: Uuid) -> RepoResult<()>;
    /// Revokes every live session of the user, optionally sparing one.
    async fn revoke_all_for_user(&self, user_id: i64, except: Option<Uuid>) -> RepoResult<u64>;
    /// Deletes the user's revoked and expired sessions.
    async fn purge_stale(&self, user_id: i64, now: OffsetDateTime) -> RepoResult<u64>;
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, is_active, created_at, last_login";

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_username_or_email(&self, identifier: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE CASE WHEN strpos($1, '@') > 0
                       THEN email = lower($1)
                       ELSE username = $1
                  END
            "#
        ))
        .bind(identifier)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn exists_username(&self, username: &str) -> RepoResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn exists_email(&self, email: &str) -> RepoResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn insert(&self, user: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(RepoError::from_sqlx)
    }

    async fn update_last_login(&self, id: i64, at: OffsetDateTime) -> RepoResult<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> RepoResult<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn deactivate(&self, id: i64) -> RepoResult<()> {
        sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: NewSession) -> RepoResult<SessionRecord> {
        let record = sqlx::query_as::<_, SessionRecord>(
            r#"
            INSERT INTO user_sessions (id, user_id, remember, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, remember, created_at, expires_at, revoked_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session.user_id)
        .bind(session.remember)
        .bind(session.expires_at)
        .fetch_one(&self.db)
        .await?;
        Ok(record)
    }

    async fn find_active(&self, id: Uuid, now: OffsetDateTime) -> RepoResult<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT id, user_id, remember, created_at, expires_at, revoked_at
            FROM user_sessions
            WHERE id = $1 AND revoked_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(record)
    }

    async fn revoke(&self, id: Uuid) -> RepoResult<()> {
        sqlx::query(
            "UPDATE user_sessions SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: i64, except: Option<Uuid>) -> RepoResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE user_sessions
               SET revoked_at = now()
             WHERE user_id = $1
               AND revoked_at IS NULL
               AND ($2::uuid IS NULL OR id <> $2)
            "#,
        )
        .bind(user_id)
        .bind(except)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }

    async fn purge_stale(&self, user_id: i64, now: OffsetDateTime) -> RepoResult<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM user_sessions
             WHERE user_id = $1
               AND (revoked_at IS NOT NULL OR expires_at <= $2)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }
}
