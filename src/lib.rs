//! Session security for authenticated users
//!
//! Issues, validates, refreshes and revokes sessions, and watches them for
//! signs of compromise:
//! - Concurrent session limits with least-recently-used eviction
//! - New device, impossible travel, anonymizing network and unusual hour checks
//! - Brute-force detection over failed logins
//! - Token rotation on activity and single-use refresh tokens
//! - Audit trail of session activity and suspicious activity alerts
//!
//! [`SessionManager`] is the entry point. Storage, geolocation, notifications
//! and time are pluggable; the defaults are in-memory and inert.

pub mod activity;
pub mod alert;
pub mod analytics;
pub mod attempts;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod geo;
pub mod locks;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod redis_store;
pub mod risk;
pub mod service;
pub mod store;
pub mod sweeper;

// Re-export commonly used types
pub use activity::{ActivityFilter, ActivityLog, MemoryActivityLog, SessionActivity};
pub use alert::{AlertFilter, AlertSeverity, AlertStore, AlertType, MemoryAlertStore, SuspiciousActivityAlert};
pub use analytics::{SessionDurationStats, SessionStats};
pub use attempts::FailedLoginWindow;
pub use clock::{generate_token, Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use device::{classify_user_agent, DeviceFingerprint, DeviceInfo, DeviceType};
pub use error::SessionError;
pub use geo::{GeoLocator, NullGeoLocator, StaticGeoLocator};
pub use middleware::{auth_middleware, optional_auth_middleware, OptionalSessionContext, SessionContext};
pub use models::{ActivityOutcome, Metadata, Rejection, Session, SessionLocation, SessionStatus, Validation};
pub use notifier::{ChannelNotifier, EventKind, NoopNotifier, Notifier, SessionEvent, TracingNotifier};
pub use redis_store::{RedisSessionStore, RedisStoreConfig};
pub use risk::{haversine_km, RiskEngine, RiskThresholds};
pub use service::{NewSession, SessionGrant, SessionManager};
pub use store::{MemorySessionStore, SessionStore};
pub use sweeper::{spawn_sweeper, SweepReport};
