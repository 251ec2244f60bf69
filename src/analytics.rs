//! Session statistics
//!
//! Aggregates over the stored sessions for dashboards:
//! - Counts by status and device type
//! - Duration statistics
//! - Geographic distribution

use crate::device::DeviceType;
use crate::models::{Session, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session duration statistics, in minutes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDurationStats {
    pub min_minutes: f64,
    pub max_minutes: f64,
    pub avg_minutes: f64,
    pub median_minutes: f64,
}

impl SessionDurationStats {
    fn from_durations(mut durations: Vec<f64>) -> Self {
        if durations.is_empty() {
            return Self::default();
        }

        durations.sort_by(|a, b| a.total_cmp(b));
        let len = durations.len();
        let median = if len % 2 == 0 {
            (durations[len / 2 - 1] + durations[len / 2]) / 2.0
        } else {
            durations[len / 2]
        };

        Self {
            min_minutes: durations[0],
            max_minutes: durations[len - 1],
            avg_minutes: durations.iter().sum::<f64>() / len as f64,
            median_minutes: median,
        }
    }
}

/// Snapshot of the session population
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub by_status: HashMap<SessionStatus, usize>,
    pub by_device_type: HashMap<DeviceType, usize>,
    /// Country code to session count; sessions without a location are skipped
    pub by_country: HashMap<String, usize>,
    pub unique_users: usize,
    pub unresolved_alerts: usize,
    /// Creation to last activity, across all sessions
    pub duration: SessionDurationStats,
}

impl SessionStats {
    pub fn from_sessions(sessions: &[Session], unresolved_alerts: usize) -> Self {
        let mut by_status = HashMap::new();
        let mut by_device_type = HashMap::new();
        let mut by_country = HashMap::new();
        let mut users = std::collections::HashSet::new();

        for session in sessions {
            *by_status.entry(session.status).or_insert(0) += 1;
            *by_device_type.entry(session.device_type).or_insert(0) += 1;
            if let Some(location) = &session.location {
                *by_country.entry(location.country.clone()).or_insert(0) += 1;
            }
            users.insert(session.user_id);
        }

        Self {
            total_sessions: sessions.len(),
            active_sessions: by_status.get(&SessionStatus::Active).copied().unwrap_or(0),
            by_status,
            by_device_type,
            by_country,
            unique_users: users.len(),
            unresolved_alerts,
            duration: SessionDurationStats::from_durations(
                sessions.iter().map(Session::duration_minutes).collect(),
            ),
        }
    }

    /// Average session duration in minutes
    pub fn average_session_duration_minutes(&self) -> f64 {
        self.duration.avg_minutes
    }
}
