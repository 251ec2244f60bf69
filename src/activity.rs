//! Session activity log
//!
//! Append-only facts about what happened to a session:
//! - Lifecycle actions recorded by the manager
//! - Per-request actions reported by callers
//! - Failed logins feeding brute-force detection

use crate::error::SessionError;
use crate::models::Metadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

/// Action names recorded by the manager itself
pub mod actions {
    pub const SESSION_CREATED: &str = "session_created";
    pub const SESSION_REFRESHED: &str = "session_refreshed";
    pub const SESSION_REVOKED: &str = "session_revoked";
    pub const SESSION_EXPIRED: &str = "session_expired";
    pub const REFRESH_DENIED: &str = "refresh_denied";
    pub const LOGIN_FAILED: &str = "login_failed";
}

/// Session activity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionActivity {
    /// Absent for actions without a session, such as failed logins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub user_id: Uuid,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SessionActivity {
    /// Create a successful activity record
    pub fn new(user_id: Uuid, action: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: None,
            user_id,
            action: action.into(),
            resource: None,
            ip_address: None,
            user_agent: None,
            timestamp,
            success: true,
            metadata: Metadata::new(),
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_resource(mut self, resource: Option<String>) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Query over recorded activity; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub session_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub success: Option<bool>,
    /// Only records at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ActivityFilter {
    pub fn matches(&self, activity: &SessionActivity) -> bool {
        self.session_id.map_or(true, |id| activity.session_id == Some(id))
            && self.user_id.map_or(true, |id| activity.user_id == id)
            && self.action.as_deref().map_or(true, |a| activity.action == a)
            && self.success.map_or(true, |s| activity.success == s)
            && self.since.map_or(true, |t| activity.timestamp >= t)
    }
}

#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, activity: SessionActivity) -> Result<(), SessionError>;

    /// Matching records, newest first
    async fn list(&self, filter: &ActivityFilter) -> Result<Vec<SessionActivity>, SessionError>;

    /// Drop records older than `before`
    async fn prune(&self, before: DateTime<Utc>) -> Result<usize, SessionError>;
}

/// Bounded in-memory log; the oldest records fall off when full
pub struct MemoryActivityLog {
    records: RwLock<VecDeque<SessionActivity>>,
    capacity: usize,
}

impl MemoryActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn append(&self, activity: SessionActivity) -> Result<(), SessionError> {
        debug!(
            "Recorded activity for user {} (session {:?}): {}",
            activity.user_id, activity.session_id, activity.action
        );

        let mut records = self.records.write();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(activity);
        Ok(())
    }

    async fn list(&self, filter: &ActivityFilter) -> Result<Vec<SessionActivity>, SessionError> {
        let records = self.records.read();
        let limit = filter.limit.unwrap_or(usize::MAX);
        // Appends arrive in time order, so walking backwards yields newest first
        Ok(records
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<usize, SessionError> {
        let mut records = self.records.write();
        let initial = records.len();
        records.retain(|a| a.timestamp >= before);
        Ok(initial - records.len())
    }
}
