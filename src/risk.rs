//! Account-takeover heuristics
//!
//! The engine only observes: it reads session history and returns alerts.
//! Filing them and acting on them is the manager's job.

use crate::alert::{AlertSeverity, AlertType, SuspiciousActivityAlert};
use crate::config::SessionConfig;
use crate::device::DeviceFingerprint;
use crate::models::{Session, SessionLocation};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde_json::json;
use uuid::Uuid;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points, in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Heuristic thresholds
#[derive(Debug, Clone)]
pub struct RiskThresholds {
    pub impossible_travel_speed_kmh: f64,
    /// Inclusive local-hour range; wraps past midnight when start > end
    pub unusual_hours: (u32, u32),
    pub brute_force_threshold: usize,
}

impl From<&SessionConfig> for RiskThresholds {
    fn from(config: &SessionConfig) -> Self {
        Self {
            impossible_travel_speed_kmh: config.impossible_travel_speed_kmh,
            unusual_hours: (config.unusual_hours_start, config.unusual_hours_end),
            brute_force_threshold: config.brute_force_threshold,
        }
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// The event being evaluated
#[derive(Debug, Clone, Copy)]
pub struct LoginContext<'a> {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub fingerprint: &'a DeviceFingerprint,
    pub location: Option<&'a SessionLocation>,
    pub ip_address: &'a str,
    pub at: DateTime<Utc>,
}

pub struct RiskEngine {
    thresholds: RiskThresholds,
}

impl RiskEngine {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Evaluate a new login against the user's existing sessions
    /// (most recent `last_activity_at` first)
    pub fn evaluate(&self, ctx: &LoginContext<'_>, history: &[Session]) -> Vec<SuspiciousActivityAlert> {
        let mut alerts = Vec::new();

        if let Some(alert) = self.check_new_device(ctx, history) {
            alerts.push(alert);
        }
        if let Some(previous) = history.first() {
            if let Some(alert) = self.check_impossible_travel(ctx, previous) {
                alerts.push(alert);
            }
        }
        if let Some(alert) = self.check_anonymizing_network(ctx) {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_unusual_time(ctx) {
            alerts.push(alert);
        }

        alerts
    }

    /// Location heuristics for a refresh from a new network origin
    pub fn evaluate_refresh(&self, ctx: &LoginContext<'_>, previous: &Session) -> Vec<SuspiciousActivityAlert> {
        self.check_impossible_travel(ctx, previous)
            .into_iter()
            .chain(self.check_anonymizing_network(ctx))
            .collect()
    }

    /// Alert when failed logins inside the window hit the threshold (high)
    /// or twice the threshold (critical)
    pub fn evaluate_failed_logins(
        &self,
        user_id: Uuid,
        failures: usize,
        window: Duration,
        at: DateTime<Utc>,
    ) -> Option<SuspiciousActivityAlert> {
        let threshold = self.thresholds.brute_force_threshold;
        if threshold == 0 {
            return None;
        }

        let severity = if failures == threshold * 2 {
            AlertSeverity::Critical
        } else if failures == threshold {
            AlertSeverity::High
        } else {
            return None;
        };

        Some(
            SuspiciousActivityAlert::new(
                user_id,
                AlertType::BruteForce,
                severity,
                format!(
                    "{} failed login attempts in the last {} minutes",
                    failures,
                    window.num_minutes()
                ),
                at,
            )
            .with_evidence(json!({
                "failed_attempts": failures,
                "window_minutes": window.num_minutes(),
            })),
        )
    }

    fn check_new_device(&self, ctx: &LoginContext<'_>, history: &[Session]) -> Option<SuspiciousActivityAlert> {
        if history.is_empty()
            || history
                .iter()
                .any(|s| s.device_fingerprint.same_device(ctx.fingerprint))
        {
            return None;
        }

        Some(
            SuspiciousActivityAlert::new(
                ctx.user_id,
                AlertType::NewDevice,
                AlertSeverity::Medium,
                "Login from a device not seen on this account",
                ctx.at,
            )
            .with_session(ctx.session_id)
            .with_evidence(json!({
                "fingerprint": ctx.fingerprint.hash,
                "user_agent": ctx.fingerprint.user_agent,
                "ip_address": ctx.ip_address,
                "known_devices": history.len(),
            })),
        )
    }

    fn check_impossible_travel(&self, ctx: &LoginContext<'_>, previous: &Session) -> Option<SuspiciousActivityAlert> {
        let current = ctx.location?;
        let last = previous.location.as_ref()?;
        let (lat1, lon1) = last.coordinates()?;
        let (lat2, lon2) = current.coordinates()?;

        let distance_km = haversine_km(lat1, lon1, lat2, lon2);
        let elapsed = ctx.at - previous.last_activity_at;
        let hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;

        let speed_kmh = if hours > 0.0 {
            distance_km / hours
        } else if distance_km > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        if speed_kmh <= self.thresholds.impossible_travel_speed_kmh {
            return None;
        }

        Some(
            SuspiciousActivityAlert::new(
                ctx.user_id,
                AlertType::ImpossibleTravel,
                AlertSeverity::High,
                format!(
                    "Travel of {:.0} km from {} to {} in {} minutes is impossible",
                    distance_km,
                    last.label(),
                    current.label(),
                    elapsed.num_minutes()
                ),
                ctx.at,
            )
            .with_session(ctx.session_id)
            .with_evidence(json!({
                "previous_session_id": previous.id,
                "previous_location": last,
                "current_location": current,
                "distance_km": distance_km,
                "elapsed_minutes": elapsed.num_minutes(),
                "speed_kmh": speed_kmh,
            })),
        )
    }

    fn check_anonymizing_network(&self, ctx: &LoginContext<'_>) -> Option<SuspiciousActivityAlert> {
        let location = ctx.location.filter(|l| l.is_anonymized())?;

        Some(
            SuspiciousActivityAlert::new(
                ctx.user_id,
                AlertType::UnusualLocation,
                AlertSeverity::Medium,
                format!("Login through an anonymizing network from {}", location.label()),
                ctx.at,
            )
            .with_session(ctx.session_id)
            .with_evidence(json!({
                "ip_address": ctx.ip_address,
                "is_vpn": location.is_vpn,
                "is_tor": location.is_tor,
                "is_proxy": location.is_proxy,
            })),
        )
    }

    fn check_unusual_time(&self, ctx: &LoginContext<'_>) -> Option<SuspiciousActivityAlert> {
        let offset = ctx
            .location
            .and_then(|l| l.utc_offset_seconds)
            .unwrap_or(0);
        let local_hour = (ctx.at + Duration::seconds(offset as i64)).hour();

        let (start, end) = self.thresholds.unusual_hours;
        let unusual = if start <= end {
            (start..=end).contains(&local_hour)
        } else {
            local_hour >= start || local_hour <= end
        };
        if !unusual {
            return None;
        }

        Some(
            SuspiciousActivityAlert::new(
                ctx.user_id,
                AlertType::UnusualTime,
                AlertSeverity::Low,
                format!("Login at unusual local hour {:02}:00", local_hour),
                ctx.at,
            )
            .with_session(ctx.session_id)
            .with_evidence(json!({
                "local_hour": local_hour,
                "utc_offset_seconds": offset,
            })),
        )
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskThresholds::default())
    }
}
