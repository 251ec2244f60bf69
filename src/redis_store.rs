//! Redis-backed session store for multi-instance deployments
//!
//! Key layout:
//! - `session:{id}` -> session JSON
//! - `session:user:{user_id}` -> set of session ids
//! - `session:all` -> set of every session id
//! - `session:token:{sha256(token)}` -> session id
//! - `refresh:{sha256(refresh_token)}` -> session id
//!
//! Every key carries the retention TTL, so Redis garbage-collects records
//! the sweeper misses.

use crate::error::SessionError;
use crate::models::Session;
use crate::store::{sort_newest_first, SessionStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Redis store configuration
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis key prefix for sessions (default: "session:")
    pub key_prefix: String,

    /// Refresh token index key prefix (default: "refresh:")
    pub refresh_token_prefix: String,

    /// TTL applied to every key (default: 90 days)
    pub retention: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "session:".to_string(),
            refresh_token_prefix: "refresh:".to_string(),
            retention: Duration::from_secs(90 * 24 * 60 * 60),
        }
    }
}

pub struct RedisSessionStore {
    config: RedisStoreConfig,
    redis: redis::aio::ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(config: RedisStoreConfig, redis: redis::aio::ConnectionManager) -> Self {
        Self { config, redis }
    }

    /// Generate Redis key for session
    fn session_key(&self, session_id: &Uuid) -> String {
        format!("{}{}", self.config.key_prefix, session_id)
    }

    /// Generate Redis key for user sessions set
    fn user_sessions_key(&self, user_id: &Uuid) -> String {
        format!("{}user:{}", self.config.key_prefix, user_id)
    }

    fn all_sessions_key(&self) -> String {
        format!("{}all", self.config.key_prefix)
    }

    fn token_key(&self, token: &str) -> String {
        format!("{}token:{}", self.config.key_prefix, token_digest(token))
    }

    fn refresh_token_key(&self, refresh_token: &str) -> String {
        format!("{}{}", self.config.refresh_token_prefix, token_digest(refresh_token))
    }

    fn ttl_secs(&self) -> u64 {
        self.config.retention.as_secs()
    }

    async fn load(&self, key: &str) -> Result<Option<Session>, SessionError> {
        let mut redis = self.redis.clone();
        let value: Option<String> = redis.get(key).await?;

        match value {
            Some(data) => {
                let session: Session = serde_json::from_str(&data)
                    .map_err(|e| SessionError::DeserializationError(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn resolve_index(&self, index_key: &str) -> Result<Option<Session>, SessionError> {
        let mut redis = self.redis.clone();
        let session_id: Option<String> = redis.get(index_key).await?;

        match session_id.and_then(|id| Uuid::parse_str(&id).ok()) {
            Some(id) => self.load(&self.session_key(&id)).await,
            None => Ok(None),
        }
    }

    async fn load_members(&self, set_key: &str) -> Result<Vec<Session>, SessionError> {
        let mut redis = self.redis.clone();
        let ids: Vec<String> = redis.smembers(set_key).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id_str in ids {
            let Ok(session_id) = Uuid::parse_str(&id_str) else {
                continue;
            };
            match self.load(&self.session_key(&session_id)).await? {
                Some(session) => sessions.push(session),
                None => {
                    // Record outlived by the set; the key TTL already dropped it
                    let _: () = redis.srem(set_key, &id_str).await?;
                }
            }
        }

        Ok(sessions)
    }
}

/// Index keys hold a digest so raw tokens never appear in key names
fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: &Session) -> Result<(), SessionError> {
        let previous = self.load(&self.session_key(&session.id)).await?;
        let mut redis = self.redis.clone();
        let ttl = self.ttl_secs();
        let id = session.id.to_string();

        let value = serde_json::to_string(session)?;
        let _: () = redis.set_ex(self.session_key(&session.id), value, ttl).await?;
        let _: () = redis.set_ex(self.token_key(&session.token), &id, ttl).await?;
        let _: () = redis
            .set_ex(self.refresh_token_key(&session.refresh_token), &id, ttl)
            .await?;

        let user_key = self.user_sessions_key(&session.user_id);
        let _: () = redis.sadd(&user_key, &id).await?;
        let _: () = redis.expire(&user_key, ttl as i64).await?;
        let _: () = redis.sadd(self.all_sessions_key(), &id).await?;

        if let Some(previous) = previous {
            if previous.token != session.token {
                let _: () = redis.del(self.token_key(&previous.token)).await?;
            }
            if previous.refresh_token != session.refresh_token {
                let _: () = redis
                    .del(self.refresh_token_key(&previous.refresh_token))
                    .await?;
            }
        }

        debug!("Stored session {} for user {}", session.id, session.user_id);

        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>, SessionError> {
        self.load(&self.session_key(&session_id)).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>, SessionError> {
        Ok(self
            .resolve_index(&self.token_key(token))
            .await?
            .filter(|s| s.token == token))
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>, SessionError> {
        Ok(self
            .resolve_index(&self.refresh_token_key(refresh_token))
            .await?
            .filter(|s| s.refresh_token == refresh_token))
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        let mut sessions = self.load_members(&self.user_sessions_key(&user_id)).await?;
        sort_newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn list_all(&self) -> Result<Vec<Session>, SessionError> {
        self.load_members(&self.all_sessions_key()).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<(), SessionError> {
        let mut redis = self.redis.clone();

        if let Some(session) = self.get(session_id).await? {
            let _: () = redis.del(self.token_key(&session.token)).await?;
            let _: () = redis
                .del(self.refresh_token_key(&session.refresh_token))
                .await?;
            let _: () = redis
                .srem(self.user_sessions_key(&session.user_id), session_id.to_string())
                .await?;
        }

        let _: () = redis.srem(self.all_sessions_key(), session_id.to_string()).await?;
        let _: () = redis.del(self.session_key(&session_id)).await?;

        debug!("Deleted session {}", session_id);

        Ok(())
    }
}
