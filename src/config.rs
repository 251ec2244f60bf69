use crate::error::SessionError;
use chrono::Duration;
use serde::Deserialize;

/// Session security configuration
///
/// Every field has a default, so a partial JSON/TOML document is enough to
/// override individual knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Access token lifetime, extended on activity (default: 60 minutes)
    pub session_duration_minutes: u64,

    /// Refresh token lifetime (default: 30 days)
    pub refresh_duration_days: u64,

    /// Maximum active sessions per user (default: 5)
    /// When exceeded, the least recently used sessions are revoked
    pub max_concurrent_sessions: usize,

    /// Idle timeout (default: 30 minutes)
    pub inactivity_timeout_minutes: u64,

    /// Issue a new access token when activity resumes after a gap (default: true)
    pub rotate_session_on_activity: bool,

    /// Gap after which activity triggers a rotation (default: 15 minutes)
    pub rotation_interval_minutes: u64,

    /// Advisory only: the caller decides whether to step up (default: true)
    pub require_mfa_for_new_device: bool,

    /// Deny refreshes that fail the binding check (default: true)
    pub block_suspicious_sessions: bool,

    /// Resolve client IPs through the GeoLocator (default: true)
    pub enable_location_tracking: bool,

    /// Speed above which two logins are considered impossible (default: 1000 km/h)
    pub impossible_travel_speed_kmh: f64,

    /// First local hour considered unusual (default: 2)
    pub unusual_hours_start: u32,

    /// Last local hour considered unusual, inclusive (default: 5)
    pub unusual_hours_end: u32,

    /// Failed logins inside the window that raise a brute-force alert (default: 5)
    pub brute_force_threshold: usize,

    /// Brute-force counting window (default: 15 minutes)
    pub brute_force_window_minutes: u64,

    /// Revoke every session of a user when a critical alert is filed (default: true)
    pub revoke_sessions_on_critical_alert: bool,

    /// Sessions are deleted this long after creation (default: 90 days)
    pub session_retention_days: u64,

    /// Activity records older than this are pruned (default: 30 days)
    pub activity_retention_days: u64,

    /// Resolved alerts older than this are pruned (default: 7 days)
    pub resolved_alert_retention_days: u64,

    /// Maximum activity records kept in memory (default: 10000)
    pub max_activity_records: usize,

    /// Background sweep period (default: 60 seconds)
    pub sweep_interval_secs: u64,

    /// Upper bound on a single GeoLocator call (default: 250 ms)
    pub geo_lookup_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_duration_minutes: 60,
            refresh_duration_days: 30,
            max_concurrent_sessions: 5,
            inactivity_timeout_minutes: 30,
            rotate_session_on_activity: true,
            rotation_interval_minutes: 15,
            require_mfa_for_new_device: true,
            block_suspicious_sessions: true,
            enable_location_tracking: true,
            impossible_travel_speed_kmh: 1000.0,
            unusual_hours_start: 2,
            unusual_hours_end: 5,
            brute_force_threshold: 5,
            brute_force_window_minutes: 15,
            revoke_sessions_on_critical_alert: true,
            session_retention_days: 90,
            activity_retention_days: 30,
            resolved_alert_retention_days: 7,
            max_activity_records: 10_000,
            sweep_interval_secs: 60,
            geo_lookup_timeout_ms: 250,
        }
    }
}

/// Longest span any duration setting may cover, about a century
pub const MAX_SPAN_DAYS: u64 = 36_500;

impl SessionConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::minutes(self.session_duration_minutes as i64)
    }

    pub fn refresh_duration(&self) -> Duration {
        Duration::days(self.refresh_duration_days as i64)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::minutes(self.inactivity_timeout_minutes as i64)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::minutes(self.rotation_interval_minutes as i64)
    }

    pub fn brute_force_window(&self) -> Duration {
        Duration::minutes(self.brute_force_window_minutes as i64)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::days(self.session_retention_days as i64)
    }

    pub fn activity_retention(&self) -> Duration {
        Duration::days(self.activity_retention_days as i64)
    }

    pub fn resolved_alert_retention(&self) -> Duration {
        Duration::days(self.resolved_alert_retention_days as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn geo_lookup_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.geo_lookup_timeout_ms)
    }

    /// Reject configurations that would break the session invariants
    pub fn validate(&self) -> Result<(), SessionError> {
        let day_spans = [
            ("refreshDurationDays", self.refresh_duration_days),
            ("sessionRetentionDays", self.session_retention_days),
            ("activityRetentionDays", self.activity_retention_days),
            ("resolvedAlertRetentionDays", self.resolved_alert_retention_days),
        ];
        for (name, days) in day_spans {
            if days > MAX_SPAN_DAYS {
                return Err(SessionError::InvalidConfig(format!(
                    "{} must not exceed {} days",
                    name, MAX_SPAN_DAYS
                )));
            }
        }
        let minute_spans = [
            ("sessionDurationMinutes", self.session_duration_minutes),
            ("inactivityTimeoutMinutes", self.inactivity_timeout_minutes),
            ("rotationIntervalMinutes", self.rotation_interval_minutes),
            ("bruteForceWindowMinutes", self.brute_force_window_minutes),
        ];
        for (name, minutes) in minute_spans {
            if minutes > MAX_SPAN_DAYS * 24 * 60 {
                return Err(SessionError::InvalidConfig(format!(
                    "{} must not exceed {} days",
                    name, MAX_SPAN_DAYS
                )));
            }
        }
        if self.session_duration_minutes == 0 {
            return Err(SessionError::InvalidConfig(
                "sessionDurationMinutes must be positive".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(SessionError::InvalidConfig(
                "sweepIntervalSecs must be positive".to_string(),
            ));
        }
        if self.refresh_duration() < self.session_duration() {
            return Err(SessionError::InvalidConfig(
                "refresh duration must not be shorter than session duration".to_string(),
            ));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(SessionError::InvalidConfig(
                "maxConcurrentSessions must be at least 1".to_string(),
            ));
        }
        if self.inactivity_timeout_minutes == 0 {
            return Err(SessionError::InvalidConfig(
                "inactivityTimeoutMinutes must be positive".to_string(),
            ));
        }
        if self.unusual_hours_start > 23 || self.unusual_hours_end > 23 {
            return Err(SessionError::InvalidConfig(
                "unusual hours must be within 0-23".to_string(),
            ));
        }
        if self.impossible_travel_speed_kmh <= 0.0 {
            return Err(SessionError::InvalidConfig(
                "impossibleTravelSpeedKmh must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.session_duration(), Duration::minutes(60));
        assert_eq!(config.refresh_duration(), Duration::days(30));
        assert_eq!(config.max_concurrent_sessions, 5);
        assert_eq!(config.inactivity_timeout(), Duration::minutes(30));
        assert!(config.rotate_session_on_activity);
        assert!(config.block_suspicious_sessions);
        assert_eq!(config.impossible_travel_speed_kmh, 1000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"maxConcurrentSessions": 2, "blockSuspiciousSessions": false}"#)
                .unwrap();
        assert_eq!(config.max_concurrent_sessions, 2);
        assert!(!config.block_suspicious_sessions);
        assert_eq!(config.session_duration_minutes, 60);
    }

    #[test]
    fn test_validate_rejects_short_refresh() {
        let config = SessionConfig {
            session_duration_minutes: 60 * 24 * 40,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = SessionConfig {
            max_concurrent_sessions: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sweep_interval() {
        let config = SessionConfig {
            sweep_interval_secs: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_spans_past_calendar_range() {
        let refresh = SessionConfig {
            refresh_duration_days: 100_000_000,
            ..SessionConfig::default()
        };
        assert!(matches!(refresh.validate(), Err(SessionError::InvalidConfig(_))));

        let retention = SessionConfig {
            session_retention_days: 100_000_000,
            ..SessionConfig::default()
        };
        assert!(matches!(retention.validate(), Err(SessionError::InvalidConfig(_))));

        let session = SessionConfig {
            session_duration_minutes: u64::MAX,
            ..SessionConfig::default()
        };
        assert!(matches!(session.validate(), Err(SessionError::InvalidConfig(_))));

        let longest = SessionConfig {
            refresh_duration_days: MAX_SPAN_DAYS,
            session_retention_days: MAX_SPAN_DAYS,
            ..SessionConfig::default()
        };
        assert!(longest.validate().is_ok());
    }
}
