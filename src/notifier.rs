//! Lifecycle and security event sink
//!
//! Delivery is best effort: the manager logs emission failures and carries on.

use crate::error::SessionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Event names published to external consumers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    SessionCreated,
    SessionRotated,
    SessionRevoked,
    SessionExpired,
    SessionRefreshed,
    SuspiciousActivity,
    AlertResolved,
    AllSessionsRevoked,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionCreated => "session-created",
            EventKind::SessionRotated => "session-rotated",
            EventKind::SessionRevoked => "session-revoked",
            EventKind::SessionExpired => "session-expired",
            EventKind::SessionRefreshed => "session-refreshed",
            EventKind::SuspiciousActivity => "suspicious-activity",
            EventKind::AlertResolved => "alert-resolved",
            EventKind::AllSessionsRevoked => "all-sessions-revoked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload handed to the [`Notifier`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(kind: EventKind, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            user_id,
            session_id: None,
            payload: serde_json::Value::Null,
            timestamp,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, event: SessionEvent) -> Result<(), SessionError>;
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn emit(&self, _event: SessionEvent) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Writes every event to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn emit(&self, event: SessionEvent) -> Result<(), SessionError> {
        info!(
            "Session event {} for user {} (session {:?}): {}",
            event.kind, event.user_id, event.session_id, event.payload
        );
        Ok(())
    }
}

/// Forwards events into a tokio channel for an async consumer
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn emit(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.sender
            .send(event)
            .map_err(|e| SessionError::NotificationFailed(format!("receiver dropped: {}", e.0.kind)))
    }
}
