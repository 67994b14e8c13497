//! In-process stores with the same contract as the Postgres ones. Used by the
//! test suite so router-level flows run without a database.

use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::{RepoResult, RepoError, SessionStore, UniqueField, UserRepository};
use crate::auth::repo_types::{NewSession, NewUser, SessionRecord, User};

#[derive(Default)]
pub struct InMemoryUsers {
    inner: Mutex<UsersInner>,
}

#[derive(Default)]
struct UsersInner {
    next_id: i64,
    rows: Vec<User>,
}

impl InMemoryUsers {
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().rows.len()
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn find_by_username_or_email(&self, identifier: &str) -> RepoResult<Option<User>> {
        let inner = self.inner.lock().unwrap();
        let found = if identifier.contains('@') {
            let email = identifier.to_lowercase();
            inner.rows.iter().find(|u| u.email == email)
        } else {
            inner.rows.iter().find(|u| u.username == identifier)
        };
        Ok(found.cloned())
    }

    async fn find_by_id(&self, id: i64) -> RepoResult<Option<User>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.rows.iter().find(|u| u.id == id).cloned())
    }

    async fn exists_username(&self, username: &str) -> RepoResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.rows.iter().any(|u| u.username == username))
    }

    async fn exists_email(&self, email: &str) -> RepoResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.rows.iter().any(|u| u.email == email))
    }

    async fn insert(&self, user: NewUser) -> RepoResult<User> {
        let mut inner = self.inner.lock().unwrap();
        if inner.rows.iter().any(|u| u.username == user.username) {
            return Err(RepoError::Conflict(UniqueField::Username));
        }
        if inner.rows.iter().any(|u| u.email == user.email) {
            return Err(RepoError::Conflict(UniqueField::Email));
        }
        inner.next_id += 1;
        let row = User {
            id: inner.next_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn update_last_login(&self, id: i64, at: OffsetDateTime) -> RepoResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(u) = inner.rows.iter_mut().find(|u| u.id == id) {
            u.last_login = Some(at);
        }
        Ok(())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> RepoResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(u) = inner.rows.iter_mut().find(|u| u.id == id) {
            u.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn deactivate(&self, id: i64) -> RepoResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(u) = inner.rows.iter_mut().find(|u| u.id == id) {
            u.is_active = false;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessions {
    rows: Mutex<Vec<SessionRecord>>,
}

impl InMemorySessions {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessions {
    async fn create(&self, session: NewSession) -> RepoResult<SessionRecord> {
        let record = SessionRecord {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            remember: session.remember,
            created_at: OffsetDateTime::now_utc(),
            expires_at: session.expires_at,
            revoked_at: None,
        };
        self.rows.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn find_active(&self, id: Uuid, now: OffsetDateTime) -> RepoResult<Option<SessionRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|s| s.id == id && s.is_live(now)).cloned())
    }

    async fn revoke(&self, id: Uuid) -> RepoResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut rows = self.rows.lock().unwrap();
        for s in rows.iter_mut().filter(|s| s.id == id && s.revoked_at.is_none()) {
            s.revoked_at = Some(now);
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: i64, except: Option<Uuid>) -> RepoResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut rows = self.rows.lock().unwrap();
        let mut revoked = 0;
        for s in rows
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.revoked_at.is_none() && Some(s.id) != except)
        {
            s.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn purge_stale(&self, user_id: i64, now: OffsetDateTime) -> RepoResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|s| s.user_id != user_id || s.is_live(now));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "$argon2id$stub".into(),
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_and_uniques_enforced() {
        let users = InMemoryUsers::default();
        let a = users.insert(new_user("alice", "alice@example.com")).await.unwrap();
        let b = users.insert(new_user("bob", "bob@example.com")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let err = users.insert(new_user("alice", "other@example.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict(UniqueField::Username)));
        let err = users.insert(new_user("carol", "bob@example.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict(UniqueField::Email)));
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn lookup_by_username_or_case_insensitive_email() {
        let users = InMemoryUsers::default();
        users.insert(new_user("alice", "alice@example.com")).await.unwrap();
        assert!(users.find_by_username_or_email("alice").await.unwrap().is_some());
        assert!(users.find_by_username_or_email("ALICE@example.com").await.unwrap().is_some());
        assert!(users.find_by_username_or_email("Alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_all_spares_the_excepted_session() {
        let sessions = InMemorySessions::default();
        let now = OffsetDateTime::now_utc();
        let expires_at = now + Duration::hours(1);
        let keep = sessions
            .create(NewSession { user_id: 1, remember: false, expires_at })
            .await
            .unwrap();
        let drop = sessions
            .create(NewSession { user_id: 1, remember: true, expires_at })
            .await
            .unwrap();

        let n = sessions.revoke_all_for_user(1, Some(keep.id)).await.unwrap();
        assert_eq!(n, 1);
        assert!(sessions.find_active(keep.id, now).await.unwrap().is_some());
        assert!(sessions.find_active(drop.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_dead_sessions_of_that_user() {
        let sessions = InMemorySessions::default();
        let now = OffsetDateTime::now_utc();
        let live = now + Duration::hours(1);
        let keep = sessions
            .create(NewSession { user_id: 1, remember: false, expires_at: live })
            .await
            .unwrap();
        let revoked = sessions
            .create(NewSession { user_id: 1, remember: false, expires_at: live })
            .await
            .unwrap();
        sessions.revoke(revoked.id).await.unwrap();
        sessions
            .create(NewSession { user_id: 1, remember: false, expires_at: now - Duration::seconds(1) })
            .await
            .unwrap();
        sessions
            .create(NewSession { user_id: 2, remember: false, expires_at: now - Duration::seconds(1) })
            .await
            .unwrap();

        assert_eq!(sessions.purge_stale(1, now).await.unwrap(), 2);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.find_active(keep.id, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn at_sign_routes_lookup_to_email_only() {
        let users = InMemoryUsers::default();
        users.insert(new_user("bob@example.com", "mallory@example.com")).await.unwrap();
        let bob = users.insert(new_user("bob", "bob@example.com")).await.unwrap();

        let found = users.find_by_username_or_email("bob@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, bob.id);
    }

    #[tokio::test]
    async fn expired_sessions_are_not_active() {
        let sessions = InMemorySessions::default();
        let now = OffsetDateTime::now_utc();
        let s = sessions
            .create(NewSession { user_id: 1, remember: false, expires_at: now - Duration::seconds(1) })
            .await
            .unwrap();
        assert!(sessions.find_active(s.id, now).await.unwrap().is_none());
    }
}
