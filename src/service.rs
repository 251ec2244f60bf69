use crate::activity::{actions, ActivityFilter, ActivityLog, MemoryActivityLog, SessionActivity};
use crate::alert::{AlertFilter, AlertSeverity, AlertStore, AlertType, MemoryAlertStore, SuspiciousActivityAlert};
use crate::analytics::SessionStats;
use crate::attempts::FailedLoginWindow;
use crate::clock::{generate_token, Clock, SystemClock};
use crate::config::SessionConfig;
use crate::device::{classify_user_agent, DeviceFingerprint};
use crate::error::SessionError;
use crate::geo::{GeoLocator, NullGeoLocator};
use crate::locks::KeyedLocks;
use crate::models::{ActivityOutcome, Metadata, Rejection, Session, SessionLocation, SessionStatus, Validation};
use crate::notifier::{EventKind, NoopNotifier, Notifier, SessionEvent};
use crate::risk::{LoginContext, RiskEngine, RiskThresholds};
use crate::store::{MemorySessionStore, SessionStore};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input to [`SessionManager::create_session`], built by the login handler
/// after credentials checked out
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub fingerprint: DeviceFingerprint,
    pub ip_address: String,
    pub user_agent: String,
    pub mfa_verified: bool,
    pub metadata: Metadata,
}

impl NewSession {
    pub fn new(
        user_id: Uuid,
        fingerprint: DeviceFingerprint,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            fingerprint,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            mfa_verified: false,
            metadata: Metadata::new(),
        }
    }

    pub fn mfa_verified(mut self, verified: bool) -> Self {
        self.mfa_verified = verified;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A freshly issued session plus what the risk checks found
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session: Session,
    /// Alerts filed while creating the session
    pub alerts: Vec<SuspiciousActivityAlert>,
    /// Advisory: the caller should step up to MFA before trusting the session
    pub mfa_required: bool,
}

/// Session security manager
///
/// Orchestrates storage, risk evaluation and geolocation for the whole
/// session lifecycle. Writes to a user's session set run under that user's
/// lock; writes to a single session run under that session's lock. When both
/// are needed the user lock is taken first.
pub struct SessionManager {
    pub(crate) config: SessionConfig,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) alerts: Arc<dyn AlertStore>,
    pub(crate) activities: Arc<dyn ActivityLog>,
    pub(crate) geo: Arc<dyn GeoLocator>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) risk: RiskEngine,
    pub(crate) user_locks: KeyedLocks<Uuid>,
    pub(crate) session_locks: KeyedLocks<Uuid>,
    pub(crate) failed_logins: FailedLoginWindow,
}

impl SessionManager {
    /// Create a manager with in-memory stores and no external collaborators
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;

        Ok(Self {
            store: Arc::new(MemorySessionStore::new()),
            alerts: Arc::new(MemoryAlertStore::new()),
            activities: Arc::new(MemoryActivityLog::new(config.max_activity_records)),
            geo: Arc::new(NullGeoLocator),
            notifier: Arc::new(NoopNotifier),
            clock: Arc::new(SystemClock),
            risk: RiskEngine::new(RiskThresholds::from(&config)),
            user_locks: KeyedLocks::new(),
            session_locks: KeyedLocks::new(),
            failed_logins: FailedLoginWindow::new(),
            config,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_alert_store(mut self, alerts: Arc<dyn AlertStore>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_activity_log(mut self, activities: Arc<dyn ActivityLog>) -> Self {
        self.activities = activities;
        self
    }

    pub fn with_geo_locator(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Issue a new session for an authenticated user
    ///
    /// Evicts the least recently used sessions when the user is at the
    /// concurrency limit, then runs the risk checks against the user's
    /// history. Alerts never block creation.
    pub async fn create_session(&self, request: NewSession) -> Result<SessionGrant, SessionError> {
        let user_id = request.user_id;
        let _user_guard = self.user_locks.lock(user_id).await;
        let now = self.clock.now();
        let session_id = Uuid::new_v4();

        let history = self.store.list_by_user(user_id).await?;
        let mut alerts = Vec::new();
        if let Some(alert) = self
            .enforce_session_limit(user_id, session_id, &history, now)
            .await?
        {
            alerts.push(alert);
        }

        let device = classify_user_agent(&request.user_agent);
        let location = self.locate(&request.ip_address).await;

        if !history.is_empty() {
            let ctx = LoginContext {
                user_id,
                session_id,
                fingerprint: &request.fingerprint,
                location: location.as_ref(),
                ip_address: &request.ip_address,
                at: now,
            };
            let findings = self.risk.evaluate(&ctx, &history);
            for alert in &findings {
                self.file_alert(alert.clone()).await;
            }
            alerts.extend(findings);
        }

        let session = Session {
            id: session_id,
            user_id,
            token: generate_token(),
            refresh_token: generate_token(),
            status: SessionStatus::Active,
            device_fingerprint: request.fingerprint,
            device_type: device.device_type,
            device_name: device.device_name,
            ip_address: request.ip_address,
            user_agent: request.user_agent,
            location,
            mfa_verified: request.mfa_verified,
            created_at: now,
            last_activity_at: now,
            expires_at: now + self.config.session_duration(),
            refresh_expires_at: now + self.config.refresh_duration(),
            metadata: request.metadata,
        };

        self.store.put(&session).await?;

        self.record_activity(
            SessionActivity::new(user_id, actions::SESSION_CREATED, now)
                .with_session(session_id)
                .with_client(Some(session.ip_address.clone()), Some(session.user_agent.clone())),
        )
        .await;
        self.notify(
            SessionEvent::new(EventKind::SessionCreated, user_id, now)
                .with_session(session_id)
                .with_payload(json!({
                    "device_type": session.device_type,
                    "device_name": session.device_name,
                    "ip_address": session.ip_address,
                    "location": session.location,
                    "mfa_verified": session.mfa_verified,
                })),
        )
        .await;

        let mfa_required = self.config.require_mfa_for_new_device
            && !session.mfa_verified
            && alerts.iter().any(|a| a.alert_type == AlertType::NewDevice);

        info!(
            "Created session {} for user {} on {} ({} alerts)",
            session_id,
            user_id,
            session.device_name,
            alerts.len()
        );

        Ok(SessionGrant {
            session,
            alerts,
            mfa_required,
        })
    }

    /// Check a bearer token
    ///
    /// Unknown, expired, idle, revoked and suspicious sessions come back as
    /// `Validation::Rejected`; only backend failures are errors.
    pub async fn validate_session(&self, token: &str) -> Result<Validation, SessionError> {
        let Some(found) = self.store.find_by_token(token).await? else {
            return Ok(Validation::Rejected(Rejection::NotFound));
        };

        let _session_guard = self.session_locks.lock(found.id).await;
        let Some(mut session) = self
            .store
            .get(found.id)
            .await?
            .filter(|s| s.token == token)
        else {
            // Rotated while we waited for the lock
            return Ok(Validation::Rejected(Rejection::NotFound));
        };

        if !session.is_active() {
            return Ok(Validation::Rejected(Rejection::for_status(session.status)));
        }

        let now = self.clock.now();
        if session.is_overdue(now, self.config.inactivity_timeout()) {
            let reason = expiry_reason(&session, now);
            self.close_locked(&mut session, SessionStatus::Expired, reason, now)
                .await?;
            return Ok(Validation::Rejected(Rejection::Expired));
        }

        Ok(Validation::Valid(session))
    }

    /// Record a request against an active session
    ///
    /// Bumps `last_activity_at`, slides `expires_at` forward (never past the
    /// refresh expiry) and rotates the access token when activity resumes
    /// after more than the rotation interval.
    pub async fn update_activity(
        &self,
        session_id: Uuid,
        action: &str,
        resource: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<ActivityOutcome, SessionError> {
        let _session_guard = self.session_locks.lock(session_id).await;
        let Some(mut session) = self.store.get(session_id).await? else {
            return Ok(ActivityOutcome::Inactive);
        };
        if !session.is_active() {
            return Ok(ActivityOutcome::Inactive);
        }

        let now = self.clock.now();
        if session.is_overdue(now, self.config.inactivity_timeout()) {
            let reason = expiry_reason(&session, now);
            self.close_locked(&mut session, SessionStatus::Expired, reason, now)
                .await?;
            return Ok(ActivityOutcome::Inactive);
        }

        let rotate = self.config.rotate_session_on_activity
            && now - session.last_activity_at > self.config.rotation_interval();
        if rotate {
            session.token = generate_token();
        }
        session.last_activity_at = now;
        session.expires_at = (now + self.config.session_duration()).min(session.refresh_expires_at);

        self.store.put(&session).await?;

        if rotate {
            debug!("Rotated token for session {}", session_id);
            self.notify(
                SessionEvent::new(EventKind::SessionRotated, session.user_id, now)
                    .with_session(session_id),
            )
            .await;
        }

        self.record_activity(
            SessionActivity::new(session.user_id, action, now)
                .with_session(session_id)
                .with_resource(resource)
                .with_client(ip_address, user_agent),
        )
        .await;

        Ok(if rotate {
            ActivityOutcome::Rotated {
                token: session.token,
            }
        } else {
            ActivityOutcome::Recorded
        })
    }

    /// Exchange a refresh token for a brand-new token pair
    ///
    /// The presented refresh token is consumed: it never validates again.
    /// A refresh from a different IP files a `session_hijacking` alert and,
    /// with `block_suspicious_sessions`, flags the session and denies.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<Validation, SessionError> {
        let Some(found) = self.store.find_by_refresh_token(refresh_token).await? else {
            return Ok(Validation::Rejected(Rejection::NotFound));
        };

        // May re-activate an expired session, which touches the user's session set
        let _user_guard = self.user_locks.lock(found.user_id).await;
        let _session_guard = self.session_locks.lock(found.id).await;
        let Some(mut session) = self
            .store
            .get(found.id)
            .await?
            .filter(|s| s.refresh_token == refresh_token)
        else {
            // Consumed by a concurrent refresh
            return Ok(Validation::Rejected(Rejection::NotFound));
        };

        match session.status {
            SessionStatus::Active | SessionStatus::Expired => {}
            status => return Ok(Validation::Rejected(Rejection::for_status(status))),
        }

        let now = self.clock.now();
        if session.refresh_expired(now) {
            if session.is_active() {
                self.close_locked(&mut session, SessionStatus::Expired, "refresh_expired", now)
                    .await?;
            }
            return Ok(Validation::Rejected(Rejection::Expired));
        }

        if session.ip_address != ip_address {
            let blocked = self.config.block_suspicious_sessions;
            self.file_alert(
                SuspiciousActivityAlert::new(
                    session.user_id,
                    AlertType::SessionHijacking,
                    AlertSeverity::High,
                    format!(
                        "Refresh from {} does not match session origin {}",
                        ip_address, session.ip_address
                    ),
                    now,
                )
                .with_session(session.id)
                .with_evidence(json!({
                    "stored_ip": session.ip_address,
                    "presented_ip": ip_address,
                    "stored_user_agent": session.user_agent,
                    "presented_user_agent": user_agent,
                    "blocked": blocked,
                })),
            )
            .await;

            if blocked {
                self.close_locked(&mut session, SessionStatus::Suspicious, "binding_mismatch", now)
                    .await?;
                return Ok(Validation::Rejected(Rejection::Suspicious));
            }

            let location = self.locate(ip_address).await;
            let ctx = LoginContext {
                user_id: session.user_id,
                session_id: session.id,
                fingerprint: &session.device_fingerprint,
                location: location.as_ref(),
                ip_address,
                at: now,
            };
            for alert in self.risk.evaluate_refresh(&ctx, &session) {
                self.file_alert(alert).await;
            }
            if self.config.enable_location_tracking {
                session.location = location;
            }
        }

        if session.status == SessionStatus::Expired {
            let others: Vec<Session> = self
                .store
                .list_by_user(session.user_id)
                .await?
                .into_iter()
                .filter(|s| s.id != session.id)
                .collect();
            self.enforce_session_limit(session.user_id, session.id, &others, now)
                .await?;
        }

        session.token = generate_token();
        session.refresh_token = generate_token();
        session.status = SessionStatus::Active;
        session.last_activity_at = now;
        session.expires_at = now + self.config.session_duration();
        session.refresh_expires_at = now + self.config.refresh_duration();
        session.ip_address = ip_address.to_string();
        session.user_agent = user_agent.to_string();

        self.store.put(&session).await?;

        self.record_activity(
            SessionActivity::new(session.user_id, actions::SESSION_REFRESHED, now)
                .with_session(session.id)
                .with_client(Some(ip_address.to_string()), Some(user_agent.to_string())),
        )
        .await;
        self.notify(
            SessionEvent::new(EventKind::SessionRefreshed, session.user_id, now)
                .with_session(session.id)
                .with_payload(json!({ "ip_address": ip_address })),
        )
        .await;

        debug!("Refreshed session {} for user {}", session.id, session.user_id);

        Ok(Validation::Valid(session))
    }

    /// Revoke one session; `false` if it was unknown or no longer active
    pub async fn revoke_session(&self, session_id: Uuid, reason: &str) -> Result<bool, SessionError> {
        self.close_session(session_id, SessionStatus::Revoked, reason)
            .await
    }

    /// Revoke every active session of a user, optionally sparing one
    /// ("log out everywhere else"); returns how many were revoked
    pub async fn revoke_all_user_sessions(
        &self,
        user_id: Uuid,
        except_session_id: Option<Uuid>,
    ) -> Result<usize, SessionError> {
        let _user_guard = self.user_locks.lock(user_id).await;
        self.revoke_all_locked(user_id, except_session_id, "all_sessions_revoked")
            .await
    }

    /// Record a failed credential check for brute-force detection
    ///
    /// Returns the alert filed, if this failure crossed a threshold. A
    /// critical alert locks the user out of every session when
    /// `revoke_sessions_on_critical_alert` is set.
    pub async fn record_failed_login(
        &self,
        user_id: Uuid,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<Option<SuspiciousActivityAlert>, SessionError> {
        let _user_guard = self.user_locks.lock(user_id).await;
        let now = self.clock.now();

        self.record_activity(
            SessionActivity::new(user_id, actions::LOGIN_FAILED, now)
                .with_client(Some(ip_address.to_string()), Some(user_agent.to_string()))
                .failed(),
        )
        .await;

        let window = self.config.brute_force_window();
        let failures = self.failed_logins.record(user_id, now, window);

        let Some(alert) = self
            .risk
            .evaluate_failed_logins(user_id, failures, window, now)
        else {
            return Ok(None);
        };
        self.file_alert(alert.clone()).await;

        if alert.severity == AlertSeverity::Critical && self.config.revoke_sessions_on_critical_alert {
            let revoked = self
                .revoke_all_locked(user_id, None, "brute_force_lockout")
                .await?;
            warn!(
                "Locked out user {} after {} failed logins ({} sessions revoked)",
                user_id, failures, revoked
            );
        }

        Ok(Some(alert))
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, SessionError> {
        self.store.get(session_id).await
    }

    /// All sessions of a user in any state, most recently used first
    pub async fn list_user_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        self.store.list_by_user(user_id).await
    }

    pub async fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<SuspiciousActivityAlert>, SessionError> {
        self.alerts.list(filter).await
    }

    /// Resolve an alert; `false` if it is unknown or already resolved
    pub async fn resolve_alert(&self, alert_id: Uuid, resolved_by: &str) -> Result<bool, SessionError> {
        let now = self.clock.now();
        let Some(alert) = self.alerts.resolve(alert_id, resolved_by, now).await? else {
            return Ok(false);
        };

        info!("Alert {} resolved by {}", alert_id, resolved_by);

        let mut event = SessionEvent::new(EventKind::AlertResolved, alert.user_id, now).with_payload(json!({
            "alert_id": alert_id,
            "alert_type": alert.alert_type,
            "resolved_by": resolved_by,
        }));
        if let Some(session_id) = alert.session_id {
            event = event.with_session(session_id);
        }
        self.notify(event).await;

        Ok(true)
    }

    pub async fn list_activities(&self, filter: &ActivityFilter) -> Result<Vec<SessionActivity>, SessionError> {
        self.activities.list(filter).await
    }

    pub async fn get_stats(&self) -> Result<SessionStats, SessionError> {
        let sessions = self.store.list_all().await?;
        let unresolved_alerts = self.alerts.count_unresolved().await?;
        Ok(SessionStats::from_sessions(&sessions, unresolved_alerts))
    }

    /// Make room for one more session. Caller holds the user lock.
    ///
    /// Overdue sessions are expired first; if the user is still at the limit
    /// the least recently used ones are revoked and a `concurrent_sessions`
    /// alert is filed against `new_session_id`.
    async fn enforce_session_limit(
        &self,
        user_id: Uuid,
        new_session_id: Uuid,
        history: &[Session],
        now: DateTime<Utc>,
    ) -> Result<Option<SuspiciousActivityAlert>, SessionError> {
        let mut active = Vec::new();
        for session in history.iter().filter(|s| s.is_active()) {
            if session.is_overdue(now, self.config.inactivity_timeout()) {
                self.close_session(session.id, SessionStatus::Expired, expiry_reason(session, now))
                    .await?;
            } else {
                active.push(session);
            }
        }

        let limit = self.config.max_concurrent_sessions;
        if active.len() < limit {
            return Ok(None);
        }

        // History is newest first, so the least recently used sit at the end
        let excess = active.len() + 1 - limit;
        let mut evicted = Vec::with_capacity(excess);
        for session in active.iter().rev().take(excess) {
            warn!(
                "Session limit exceeded for user {}, revoking session {}",
                user_id, session.id
            );
            if self
                .close_session(session.id, SessionStatus::Revoked, "concurrent_session_limit")
                .await?
            {
                evicted.push(session.id);
            }
        }

        let alert = SuspiciousActivityAlert::new(
            user_id,
            AlertType::ConcurrentSessions,
            AlertSeverity::Low,
            format!(
                "Session limit of {} reached; {} older session(s) revoked",
                limit,
                evicted.len()
            ),
            now,
        )
        .with_session(new_session_id)
        .with_evidence(json!({
            "limit": limit,
            "evicted_count": evicted.len(),
            "evicted_session_ids": evicted,
        }));
        self.file_alert(alert.clone()).await;

        Ok(Some(alert))
    }

    /// Revoke all active sessions of a user. Caller holds the user lock.
    async fn revoke_all_locked(
        &self,
        user_id: Uuid,
        except_session_id: Option<Uuid>,
        reason: &str,
    ) -> Result<usize, SessionError> {
        let sessions = self.store.list_by_user(user_id).await?;

        let mut revoked = 0;
        for session in sessions
            .iter()
            .filter(|s| s.is_active() && Some(s.id) != except_session_id)
        {
            if self
                .close_session(session.id, SessionStatus::Revoked, reason)
                .await?
            {
                revoked += 1;
            }
        }

        let now = self.clock.now();
        self.notify(
            SessionEvent::new(EventKind::AllSessionsRevoked, user_id, now).with_payload(json!({
                "count": revoked,
                "except_session_id": except_session_id,
                "reason": reason,
            })),
        )
        .await;

        info!("Revoked {} sessions for user {} ({})", revoked, user_id, reason);

        Ok(revoked)
    }

    /// Move an active session to a terminal status under its own lock
    pub(crate) async fn close_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        reason: &str,
    ) -> Result<bool, SessionError> {
        let _session_guard = self.session_locks.lock(session_id).await;
        let Some(mut session) = self.store.get(session_id).await? else {
            return Ok(false);
        };
        if !session.is_active() {
            return Ok(false);
        }

        let now = self.clock.now();
        self.close_locked(&mut session, status, reason, now).await?;
        Ok(true)
    }

    /// Persist a status transition and report it. Caller holds the session lock.
    async fn close_locked(
        &self,
        session: &mut Session,
        status: SessionStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        session.status = status;
        self.store.put(session).await?;

        let (action, event) = match status {
            SessionStatus::Expired => (actions::SESSION_EXPIRED, Some(EventKind::SessionExpired)),
            SessionStatus::Revoked => (actions::SESSION_REVOKED, Some(EventKind::SessionRevoked)),
            // The suspicious-activity event already went out with the alert
            SessionStatus::Suspicious => (actions::REFRESH_DENIED, None),
            SessionStatus::Active => return Ok(()),
        };

        debug!("Session {} for user {} is now {} ({})", session.id, session.user_id, status, reason);

        self.record_activity(
            SessionActivity::new(session.user_id, action, now)
                .with_session(session.id)
                .with_metadata("reason", json!(reason)),
        )
        .await;
        if let Some(kind) = event {
            self.notify(
                SessionEvent::new(kind, session.user_id, now)
                    .with_session(session.id)
                    .with_payload(json!({ "reason": reason })),
            )
            .await;
        }

        Ok(())
    }

    /// Resolve an IP, degrading to "no location" on any failure
    async fn locate(&self, ip_address: &str) -> Option<SessionLocation> {
        if !self.config.enable_location_tracking {
            return None;
        }

        match tokio::time::timeout(self.config.geo_lookup_timeout(), self.geo.resolve(ip_address)).await {
            Ok(Ok(location)) => location,
            Ok(Err(e)) => {
                debug!("Geolocation failed for {}: {}", ip_address, e);
                None
            }
            Err(_) => {
                warn!("Geolocation timed out for {}", ip_address);
                None
            }
        }
    }

    /// Store and publish an alert; failures are logged, never propagated
    async fn file_alert(&self, alert: SuspiciousActivityAlert) {
        warn!(
            "Suspicious activity for user {}: {} ({}) - {}",
            alert.user_id, alert.alert_type, alert.severity, alert.description
        );

        let mut event = SessionEvent::new(EventKind::SuspiciousActivity, alert.user_id, alert.timestamp)
            .with_payload(serde_json::to_value(&alert).unwrap_or_default());
        if let Some(session_id) = alert.session_id {
            event = event.with_session(session_id);
        }

        if let Err(e) = self.alerts.create(alert).await {
            warn!("Failed to store alert: {:?}", e);
        }
        self.notify(event).await;
    }

    async fn record_activity(&self, activity: SessionActivity) {
        if let Err(e) = self.activities.append(activity).await {
            warn!("Failed to record activity: {:?}", e);
        }
    }

    async fn notify(&self, event: SessionEvent) {
        let kind = event.kind;
        if let Err(e) = self.notifier.emit(event).await {
            warn!("Failed to emit {} event: {:?}", kind, e);
        }
    }
}

fn expiry_reason(session: &Session, now: DateTime<Utc>) -> &'static str {
    if now > session.expires_at {
        "expired"
    } else {
        "idle_timeout"
    }
}
