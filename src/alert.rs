//! Suspicious activity alerts
//!
//! Alerts are append-mostly: the only mutation is resolution by an operator.

use crate::error::SessionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ImpossibleTravel,
    NewDevice,
    UnusualLocation,
    BruteForce,
    SessionHijacking,
    ConcurrentSessions,
    UnusualTime,
    UnusualBehavior,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertType::ImpossibleTravel => "impossible_travel",
            AlertType::NewDevice => "new_device",
            AlertType::UnusualLocation => "unusual_location",
            AlertType::BruteForce => "brute_force",
            AlertType::SessionHijacking => "session_hijacking",
            AlertType::ConcurrentSessions => "concurrent_sessions",
            AlertType::UnusualTime => "unusual_time",
            AlertType::UnusualBehavior => "unusual_behavior",
        };
        f.write_str(name)
    }
}

/// Ordered from least to most severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousActivityAlert {
    pub id: Uuid,
    /// Absent for user-level signals such as brute force
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub user_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub description: String,
    pub evidence: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SuspiciousActivityAlert {
    pub fn new(
        user_id: Uuid,
        alert_type: AlertType,
        severity: AlertSeverity,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: None,
            user_id,
            alert_type,
            severity,
            description: description.into(),
            evidence: serde_json::Value::Null,
            timestamp,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Query over stored alerts; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub alert_type: Option<AlertType>,
    pub resolved: Option<bool>,
    pub severity: Option<AlertSeverity>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn unresolved(mut self) -> Self {
        self.resolved = Some(false);
        self
    }

    pub fn of_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = Some(alert_type);
        self
    }

    pub fn matches(&self, alert: &SuspiciousActivityAlert) -> bool {
        self.user_id.map_or(true, |id| alert.user_id == id)
            && self.session_id.map_or(true, |id| alert.session_id == Some(id))
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.resolved.map_or(true, |r| alert.resolved == r)
            && self.severity.map_or(true, |s| alert.severity == s)
    }
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, alert: SuspiciousActivityAlert) -> Result<(), SessionError>;

    /// Mark an alert resolved; `None` if missing or already resolved
    async fn resolve(
        &self,
        alert_id: Uuid,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SuspiciousActivityAlert>, SessionError>;

    /// Matching alerts, newest first
    async fn list(&self, filter: &AlertFilter) -> Result<Vec<SuspiciousActivityAlert>, SessionError>;

    async fn count_unresolved(&self) -> Result<usize, SessionError>;

    /// Drop resolved alerts whose resolution predates `before`
    async fn prune_resolved(&self, before: DateTime<Utc>) -> Result<usize, SessionError>;
}

#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: DashMap<Uuid, SuspiciousActivityAlert>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn create(&self, alert: SuspiciousActivityAlert) -> Result<(), SessionError> {
        self.alerts.insert(alert.id, alert);
        Ok(())
    }

    async fn resolve(
        &self,
        alert_id: Uuid,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SuspiciousActivityAlert>, SessionError> {
        let Some(mut alert) = self.alerts.get_mut(&alert_id) else {
            return Ok(None);
        };
        if alert.resolved {
            return Ok(None);
        }

        alert.resolved = true;
        alert.resolved_by = Some(resolved_by.to_string());
        alert.resolved_at = Some(at);
        Ok(Some(alert.clone()))
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<SuspiciousActivityAlert>, SessionError> {
        let mut alerts: Vec<SuspiciousActivityAlert> = self
            .alerts
            .iter()
            .filter(|a| filter.matches(a.value()))
            .map(|a| a.value().clone())
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    async fn count_unresolved(&self) -> Result<usize, SessionError> {
        Ok(self.alerts.iter().filter(|a| !a.resolved).count())
    }

    async fn prune_resolved(&self, before: DateTime<Utc>) -> Result<usize, SessionError> {
        let initial = self.alerts.len();
        self.alerts
            .retain(|_, a| !(a.resolved && a.resolved_at.map_or(false, |at| at < before)));
        Ok(initial.saturating_sub(self.alerts.len()))
    }
}
