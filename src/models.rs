use crate::device::{DeviceFingerprint, DeviceType};
use crate::error::SessionError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Caller-supplied opaque data attached to sessions, activities and events
pub type Metadata = HashMap<String, serde_json::Value>;

/// Session lifecycle state
///
/// `Expired`, `Revoked` and `Suspicious` are terminal for a record, except
/// that an expired session may still be brought back by its refresh token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
    Suspicious,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Expired => write!(f, "expired"),
            SessionStatus::Revoked => write!(f, "revoked"),
            SessionStatus::Suspicious => write!(f, "suspicious"),
        }
    }
}

/// Coarse location and network reputation of a client IP
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionLocation {
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    /// Offset from UTC at the location; UTC is assumed when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset_seconds: Option<i32>,
    #[serde(default)]
    pub is_vpn: bool,
    #[serde(default)]
    pub is_tor: bool,
    #[serde(default)]
    pub is_proxy: bool,
}

impl SessionLocation {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            ..Self::default()
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_utc_offset(mut self, seconds: i32) -> Self {
        self.utc_offset_seconds = Some(seconds);
        self
    }

    /// Latitude/longitude pair, if both were resolved
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    /// VPN, Tor or open proxy
    pub fn is_anonymized(&self) -> bool {
        self.is_vpn || self.is_tor || self.is_proxy
    }

    /// "City, Country" for alert descriptions
    pub fn label(&self) -> String {
        match &self.city {
            Some(city) => format!("{}, {}", city, self.country),
            None => self.country.clone(),
        }
    }
}

/// A user session bound to a device and network origin
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Short-lived bearer credential, replaced on rotation
    pub token: String,

    /// Long-lived credential, replaced on every refresh
    pub refresh_token: String,

    pub status: SessionStatus,

    pub device_fingerprint: DeviceFingerprint,
    pub device_type: DeviceType,
    pub device_name: String,
    pub ip_address: String,
    pub user_agent: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SessionLocation>,

    /// Set by the external MFA flow
    pub mfa_verified: bool,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Past the access-token expiry or idle for longer than `inactivity_timeout`
    pub fn is_overdue(&self, now: DateTime<Utc>, inactivity_timeout: Duration) -> bool {
        now > self.expires_at || now - self.last_activity_at > inactivity_timeout
    }

    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.refresh_expires_at
    }

    /// Time between creation and last activity, in minutes
    pub fn duration_minutes(&self) -> f64 {
        (self.last_activity_at - self.created_at).num_seconds() as f64 / 60.0
    }
}

// Tokens never end up in logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("status", &self.status)
            .field("device_type", &self.device_type)
            .field("device_name", &self.device_name)
            .field("ip_address", &self.ip_address)
            .field("location", &self.location)
            .field("mfa_verified", &self.mfa_verified)
            .field("created_at", &self.created_at)
            .field("last_activity_at", &self.last_activity_at)
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Why a token did not authenticate
///
/// Kept for audit logs and admin views; end users only ever see a generic
/// "please sign in again".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    Expired,
    Revoked,
    Suspicious,
}

impl Rejection {
    pub(crate) fn for_status(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Revoked => Rejection::Revoked,
            SessionStatus::Suspicious => Rejection::Suspicious,
            SessionStatus::Active | SessionStatus::Expired => Rejection::Expired,
        }
    }
}

impl From<Rejection> for SessionError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NotFound => SessionError::SessionNotFound,
            Rejection::Expired => SessionError::SessionExpired,
            Rejection::Revoked => SessionError::SessionRevoked,
            Rejection::Suspicious => SessionError::SuspiciousSession,
        }
    }
}

/// Outcome of validating or refreshing a credential
#[derive(Debug, Clone)]
pub enum Validation {
    Valid(Session),
    Rejected(Rejection),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Validation::Valid(session) => Some(session),
            Validation::Rejected(_) => None,
        }
    }

    pub fn into_session(self) -> Option<Session> {
        match self {
            Validation::Valid(session) => Some(session),
            Validation::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Validation::Valid(_) => None,
            Validation::Rejected(rejection) => Some(*rejection),
        }
    }

    /// Convert into a `Result` for callers that prefer `?`
    pub fn into_result(self) -> Result<Session, SessionError> {
        match self {
            Validation::Valid(session) => Ok(session),
            Validation::Rejected(rejection) => Err(rejection.into()),
        }
    }
}

/// Result of `UpdateActivity`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Session was not active; nothing recorded
    Inactive,
    /// Activity recorded, token unchanged
    Recorded,
    /// Activity recorded and the access token was rotated
    Rotated { token: String },
}

impl ActivityOutcome {
    pub fn is_recorded(&self) -> bool {
        !matches!(self, ActivityOutcome::Inactive)
    }

    pub fn rotated_token(&self) -> Option<&str> {
        match self {
            ActivityOutcome::Rotated { token } => Some(token),
            _ => None,
        }
    }
}
