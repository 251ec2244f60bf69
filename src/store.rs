//! Session storage
//!
//! A pure indexed table: no business rules, just lookups by id, token,
//! refresh token and user. Callers serialize writes per session and per user.

use crate::error::SessionError;
use crate::models::Session;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session, keeping token indexes in step
    async fn put(&self, session: &Session) -> Result<(), SessionError>;

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, SessionError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>, SessionError>;

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>, SessionError>;

    /// All sessions of a user, most recent `last_activity_at` first
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError>;

    /// Every stored session, for sweeps and statistics
    async fn list_all(&self) -> Result<Vec<Session>, SessionError>;

    async fn delete(&self, session_id: Uuid) -> Result<(), SessionError>;
}

/// In-process store for single-instance deployments and tests
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<Uuid, Session>,
    by_token: DashMap<String, Uuid>,
    by_refresh_token: DashMap<String, Uuid>,
    user_sessions: DashMap<Uuid, HashSet<Uuid>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn unindex_tokens(&self, session: &Session) {
        self.by_token.remove_if(&session.token, |_, id| *id == session.id);
        self.by_refresh_token
            .remove_if(&session.refresh_token, |_, id| *id == session.id);
    }

    fn lookup(&self, index: &DashMap<String, Uuid>, token: &str) -> Option<Uuid> {
        index.get(token).map(|entry| *entry.value())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &Session) -> Result<(), SessionError> {
        self.by_token.insert(session.token.clone(), session.id);
        self.by_refresh_token
            .insert(session.refresh_token.clone(), session.id);
        self.user_sessions
            .entry(session.user_id)
            .or_default()
            .insert(session.id);

        if let Some(previous) = self.sessions.insert(session.id, session.clone()) {
            if previous.token != session.token {
                self.by_token.remove_if(&previous.token, |_, id| *id == session.id);
            }
            if previous.refresh_token != session.refresh_token {
                self.by_refresh_token
                    .remove_if(&previous.refresh_token, |_, id| *id == session.id);
            }
        }

        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.get(&session_id).map(|s| s.clone()))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>, SessionError> {
        Ok(self
            .lookup(&self.by_token, token)
            .and_then(|id| self.sessions.get(&id).map(|s| s.clone()))
            .filter(|s| s.token == token))
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>, SessionError> {
        Ok(self
            .lookup(&self.by_refresh_token, refresh_token)
            .and_then(|id| self.sessions.get(&id).map(|s| s.clone()))
            .filter(|s| s.refresh_token == refresh_token))
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        let ids: Vec<Uuid> = self
            .user_sessions
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut sessions: Vec<Session> = ids
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|s| s.clone()))
            .collect();
        sort_newest_first(&mut sessions);

        Ok(sessions)
    }

    async fn list_all(&self) -> Result<Vec<Session>, SessionError> {
        Ok(self.sessions.iter().map(|s| s.value().clone()).collect())
    }

    async fn delete(&self, session_id: Uuid) -> Result<(), SessionError> {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            self.unindex_tokens(&session);
            if let Some(mut ids) = self.user_sessions.get_mut(&session.user_id) {
                ids.remove(&session_id);
            }
            self.user_sessions
                .remove_if(&session.user_id, |_, ids| ids.is_empty());
        }
        Ok(())
    }
}

/// Most recently used first; ties fall back to creation time, then id
pub(crate) fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.last_activity_at
            .cmp(&a.last_activity_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::{DeviceFingerprint, DeviceType};
    use crate::models::SessionStatus;
    use chrono::{Duration, Utc};

    pub(crate) fn sample_session(user_id: Uuid) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id,
            token: crate::clock::generate_token(),
            refresh_token: crate::clock::generate_token(),
            status: SessionStatus::Active,
            device_fingerprint: DeviceFingerprint::from_signals("Mozilla/5.0", "Linux", "en-US", "UTC"),
            device_type: DeviceType::Desktop,
            device_name: "Firefox on Linux".to_string(),
            ip_address: "203.0.113.10".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            location: None,
            mfa_verified: false,
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::hours(1),
            refresh_expires_at: now + Duration::days(30),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_put_and_lookup_by_tokens() {
        let store = MemorySessionStore::new();
        let session = sample_session(Uuid::new_v4());
        store.put(&session).await.unwrap();

        assert_eq!(store.get(session.id).await.unwrap().unwrap().id, session.id);
        assert_eq!(
            store.find_by_token(&session.token).await.unwrap().unwrap().id,
            session.id
        );
        assert_eq!(
            store
                .find_by_refresh_token(&session.refresh_token)
                .await
                .unwrap()
                .unwrap()
                .id,
            session.id
        );
    }

    #[tokio::test]
    async fn test_rotated_tokens_stop_resolving() {
        let store = MemorySessionStore::new();
        let mut session = sample_session(Uuid::new_v4());
        store.put(&session).await.unwrap();

        let old_token = session.token.clone();
        let old_refresh = session.refresh_token.clone();
        session.token = crate::clock::generate_token();
        session.refresh_token = crate::clock::generate_token();
        store.put(&session).await.unwrap();

        assert!(store.find_by_token(&old_token).await.unwrap().is_none());
        assert!(store.find_by_refresh_token(&old_refresh).await.unwrap().is_none());
        assert!(store.find_by_token(&session.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_by_user_newest_activity_first() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();

        let mut older = sample_session(user_id);
        older.last_activity_at = Utc::now() - Duration::minutes(10);
        let newer = sample_session(user_id);
        store.put(&older).await.unwrap();
        store.put(&newer).await.unwrap();
        store.put(&sample_session(Uuid::new_v4())).await.unwrap();

        let sessions = store.list_by_user(user_id).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, newer.id);
        assert_eq!(sessions[1].id, older.id);
    }

    #[tokio::test]
    async fn test_list_by_user_breaks_ties_deterministically() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let mut sessions: Vec<Session> = (0..4).map(|_| sample_session(user_id)).collect();
        for session in sessions.iter_mut() {
            session.last_activity_at = now;
            session.created_at = now;
        }
        sessions[3].created_at = now - Duration::minutes(1);
        for session in &sessions {
            store.put(session).await.unwrap();
        }

        let listed: Vec<Uuid> = store
            .list_by_user(user_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        let mut tied: Vec<Uuid> = sessions[..3].iter().map(|s| s.id).collect();
        tied.sort_by(|a, b| b.cmp(a));

        assert_eq!(&listed[..3], &tied[..]);
        assert_eq!(listed[3], sessions[3].id);
        assert_eq!(store.list_by_user(user_id).await.unwrap().iter().map(|s| s.id).collect::<Vec<_>>(), listed);
    }

    #[tokio::test]
    async fn test_delete_clears_indexes() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        let session = sample_session(user_id);
        store.put(&session).await.unwrap();
        store.delete(session.id).await.unwrap();

        assert!(store.is_empty());
        assert!(store.find_by_token(&session.token).await.unwrap().is_none());
        assert!(store.list_by_user(user_id).await.unwrap().is_empty());
    }
}
