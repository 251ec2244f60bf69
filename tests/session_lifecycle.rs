use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use pleme_session_security::{
    AlertFilter, AlertSeverity, AlertType, ChannelNotifier, Clock, DeviceFingerprint, EventKind, GeoLocator,
    ManualClock, NewSession, Notifier, Rejection, SessionConfig, SessionError, SessionEvent, SessionLocation,
    SessionManager, SessionStatus, StaticGeoLocator,
};
use std::sync::Arc;
use uuid::Uuid;

const SF_IP: &str = "198.51.100.1";
const NYC_IP: &str = "198.51.100.2";
const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36";

fn laptop() -> DeviceFingerprint {
    DeviceFingerprint::from_signals(CHROME_WINDOWS, "Win32", "en-US", "America/Los_Angeles")
        .with_screen_resolution("2560x1440")
}

fn phone() -> DeviceFingerprint {
    DeviceFingerprint::from_signals(
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) Mobile/15E148 Safari/604.1",
        "iPhone",
        "en-US",
        "America/New_York",
    )
}

fn geo() -> StaticGeoLocator {
    StaticGeoLocator::new()
        .with_entry(
            SF_IP,
            SessionLocation::new("US")
                .with_city("San Francisco")
                .with_coordinates(37.7749, -122.4194)
                .with_utc_offset(-8 * 3600),
        )
        .with_entry(
            NYC_IP,
            SessionLocation::new("US")
                .with_city("New York")
                .with_coordinates(40.7128, -74.0060)
                .with_utc_offset(-5 * 3600),
        )
}

/// 15:00 UTC keeps both cities out of the 02:00-05:00 window
fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 4, 15, 0, 0).unwrap()))
}

fn manager(config: SessionConfig, clock: Arc<ManualClock>) -> SessionManager {
    SessionManager::new(config)
        .unwrap()
        .with_clock(clock)
        .with_geo_locator(Arc::new(geo()))
}

fn login(user_id: Uuid, fingerprint: DeviceFingerprint, ip: &str) -> NewSession {
    NewSession::new(user_id, fingerprint, ip, CHROME_WINDOWS)
}

#[tokio::test]
async fn test_create_then_validate_round_trip() {
    let manager = manager(SessionConfig::default(), clock());
    let user_id = Uuid::new_v4();

    let grant = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();
    let validated = manager
        .validate_session(&grant.session.token)
        .await
        .unwrap()
        .into_session()
        .unwrap();

    assert_eq!(validated.id, grant.session.id);
    assert_eq!(validated.user_id, user_id);
    assert_eq!(validated.device_name, "Chrome on Windows");
    assert_eq!(validated.location.unwrap().city.as_deref(), Some("San Francisco"));
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let manager = manager(SessionConfig::default(), clock());
    let grant = manager
        .create_session(login(Uuid::new_v4(), laptop(), SF_IP))
        .await
        .unwrap();

    assert!(manager.revoke_session(grant.session.id, "logout").await.unwrap());
    assert!(!manager.revoke_session(grant.session.id, "logout").await.unwrap());
    assert!(!manager.revoke_session(Uuid::new_v4(), "logout").await.unwrap());

    let result = manager.validate_session(&grant.session.token).await.unwrap();
    assert_eq!(result.rejection(), Some(Rejection::Revoked));
}

#[tokio::test]
async fn test_expiry_boundary() {
    let config = SessionConfig {
        session_duration_minutes: 60,
        inactivity_timeout_minutes: 120,
        ..SessionConfig::default()
    };
    let clock = clock();
    let manager = manager(config, clock.clone());
    let grant = manager
        .create_session(login(Uuid::new_v4(), laptop(), SF_IP))
        .await
        .unwrap();

    clock.advance(Duration::minutes(59) + Duration::seconds(59));
    assert!(manager.validate_session(&grant.session.token).await.unwrap().is_valid());

    clock.advance(Duration::seconds(2));
    let result = manager.validate_session(&grant.session.token).await.unwrap();
    assert_eq!(result.rejection(), Some(Rejection::Expired));
    assert!(matches!(result.into_result(), Err(SessionError::SessionExpired)));
}

#[tokio::test]
async fn test_impossible_travel_is_flagged() {
    let clock = clock();
    let manager = manager(SessionConfig::default(), clock.clone());
    let user_id = Uuid::new_v4();

    manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();
    clock.advance(Duration::minutes(5));
    let grant = manager.create_session(login(user_id, laptop(), NYC_IP)).await.unwrap();

    let travel: Vec<_> = grant
        .alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::ImpossibleTravel)
        .collect();
    assert_eq!(travel.len(), 1);
    assert_eq!(travel[0].severity, AlertSeverity::High);
    assert_eq!(travel[0].session_id, Some(grant.session.id));
    assert!(travel[0].evidence["speed_kmh"].as_f64().unwrap() > 1000.0);

    // Alerts never block creation
    assert!(manager.validate_session(&grant.session.token).await.unwrap().is_valid());
    assert!(!grant.mfa_required);
}

#[tokio::test]
async fn test_new_device_requires_mfa() {
    let manager = manager(SessionConfig::default(), clock());
    let user_id = Uuid::new_v4();

    let first = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();
    assert!(first.alerts.is_empty());

    let second = manager.create_session(login(user_id, phone(), SF_IP)).await.unwrap();
    assert!(second.alerts.iter().any(|a| a.alert_type == AlertType::NewDevice));
    assert!(second.mfa_required);

    let verified = manager
        .create_session(login(user_id, phone().with_canvas("c0ffee"), SF_IP).mfa_verified(true))
        .await
        .unwrap();
    assert!(verified.alerts.iter().any(|a| a.alert_type == AlertType::NewDevice));
    assert!(!verified.mfa_required);
}

#[tokio::test]
async fn test_session_limit_evicts_least_recently_used() {
    let config = SessionConfig {
        max_concurrent_sessions: 2,
        ..SessionConfig::default()
    };
    let clock = clock();
    let manager = manager(config, clock.clone());
    let user_id = Uuid::new_v4();

    let s1 = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap().session;
    clock.advance(Duration::seconds(1));
    let s2 = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap().session;
    clock.advance(Duration::seconds(1));
    let s3 = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();

    for (id, expected) in [
        (s1.id, SessionStatus::Revoked),
        (s2.id, SessionStatus::Active),
        (s3.session.id, SessionStatus::Active),
    ] {
        let stored = manager.get_session(id).await.unwrap().unwrap();
        assert_eq!(stored.status, expected);
    }

    let concurrent: Vec<_> = s3
        .alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::ConcurrentSessions)
        .collect();
    assert_eq!(concurrent.len(), 1);
    assert_eq!(concurrent[0].evidence["evicted_count"], 1);
}

#[tokio::test]
async fn test_refresh_rotates_both_tokens() {
    let clock = clock();
    let manager = manager(SessionConfig::default(), clock.clone());
    let grant = manager
        .create_session(login(Uuid::new_v4(), laptop(), SF_IP))
        .await
        .unwrap();

    clock.advance(Duration::minutes(10));
    let refreshed = manager
        .refresh_session(&grant.session.refresh_token, SF_IP, CHROME_WINDOWS)
        .await
        .unwrap()
        .into_session()
        .unwrap();

    assert_eq!(refreshed.id, grant.session.id);
    assert_ne!(refreshed.token, grant.session.token);
    assert_ne!(refreshed.refresh_token, grant.session.refresh_token);
    assert_eq!(refreshed.expires_at, clock.now() + Duration::minutes(60));

    let replay = manager
        .refresh_session(&grant.session.refresh_token, SF_IP, CHROME_WINDOWS)
        .await
        .unwrap();
    assert_eq!(replay.rejection(), Some(Rejection::NotFound));

    let old_access = manager.validate_session(&grant.session.token).await.unwrap();
    assert_eq!(old_access.rejection(), Some(Rejection::NotFound));
    assert!(manager.validate_session(&refreshed.token).await.unwrap().is_valid());
}

#[tokio::test]
async fn test_refresh_from_other_ip_is_blocked() {
    let manager = manager(SessionConfig::default(), clock());
    let user_id = Uuid::new_v4();
    let grant = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();

    let result = manager
        .refresh_session(&grant.session.refresh_token, NYC_IP, CHROME_WINDOWS)
        .await
        .unwrap();
    assert_eq!(result.rejection(), Some(Rejection::Suspicious));

    let stored = manager.get_session(grant.session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Suspicious);

    let alerts = manager
        .get_alerts(&AlertFilter::for_user(user_id).of_type(AlertType::SessionHijacking))
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].evidence["presented_ip"], NYC_IP);

    // Flagged sessions stay dead
    let again = manager.validate_session(&grant.session.token).await.unwrap();
    assert_eq!(again.rejection(), Some(Rejection::Suspicious));
}

#[tokio::test]
async fn test_unblocked_refresh_runs_travel_check() {
    let config = SessionConfig {
        block_suspicious_sessions: false,
        ..SessionConfig::default()
    };
    let clock = clock();
    let manager = manager(config, clock.clone());
    let user_id = Uuid::new_v4();
    let grant = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();

    clock.advance(Duration::minutes(5));
    let refreshed = manager
        .refresh_session(&grant.session.refresh_token, NYC_IP, CHROME_WINDOWS)
        .await
        .unwrap()
        .into_session()
        .unwrap();
    assert_eq!(refreshed.location.unwrap().city.as_deref(), Some("New York"));

    let travel = manager
        .get_alerts(&AlertFilter::for_user(user_id).of_type(AlertType::ImpossibleTravel))
        .await
        .unwrap();
    assert_eq!(travel.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_respect_limit() {
    let config = SessionConfig {
        max_concurrent_sessions: 3,
        ..SessionConfig::default()
    };
    let manager = Arc::new(manager(config, clock()));
    let user_id = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.create_session(login(user_id, laptop(), SF_IP)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let sessions = manager.list_user_sessions(user_id).await.unwrap();
    assert_eq!(sessions.len(), 20);
    assert_eq!(sessions.iter().filter(|s| s.is_active()).count(), 3);
}

#[tokio::test]
async fn test_brute_force_locks_out_user() {
    let (notifier, mut events) = ChannelNotifier::new();
    let manager = manager(SessionConfig::default(), clock()).with_notifier(Arc::new(notifier));
    let user_id = Uuid::new_v4();
    let grant = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();

    let mut severities = Vec::new();
    for _ in 0..10 {
        if let Some(alert) = manager
            .record_failed_login(user_id, "192.0.2.200", "python-requests/2.31")
            .await
            .unwrap()
        {
            severities.push(alert.severity);
        }
    }
    assert_eq!(severities, vec![AlertSeverity::High, AlertSeverity::Critical]);

    let result = manager.validate_session(&grant.session.token).await.unwrap();
    assert_eq!(result.rejection(), Some(Rejection::Revoked));

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&EventKind::AllSessionsRevoked));
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::SuspiciousActivity).count(), 2);
}

#[tokio::test]
async fn test_lifecycle_events_are_emitted() {
    let (notifier, mut events) = ChannelNotifier::new();
    let manager = manager(SessionConfig::default(), clock()).with_notifier(Arc::new(notifier));
    let user_id = Uuid::new_v4();

    let grant = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();
    manager
        .refresh_session(&grant.session.refresh_token, SF_IP, CHROME_WINDOWS)
        .await
        .unwrap();
    manager.revoke_session(grant.session.id, "logout").await.unwrap();

    let created = events.recv().await.unwrap();
    assert_eq!(created.kind, EventKind::SessionCreated);
    assert_eq!(created.session_id, Some(grant.session.id));
    assert_eq!(events.recv().await.unwrap().kind, EventKind::SessionRefreshed);
    let revoked = events.recv().await.unwrap();
    assert_eq!(revoked.kind, EventKind::SessionRevoked);
    assert_eq!(revoked.payload["reason"], "logout");
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn emit(&self, _event: SessionEvent) -> Result<(), SessionError> {
        Err(SessionError::NotificationFailed("webhook down".to_string()))
    }
}

struct SlowGeoLocator;

#[async_trait]
impl GeoLocator for SlowGeoLocator {
    async fn resolve(&self, _ip: &str) -> Result<Option<SessionLocation>, SessionError> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(Some(SessionLocation::new("US")))
    }
}

#[tokio::test]
async fn test_side_effect_failures_do_not_block() {
    let config = SessionConfig {
        geo_lookup_timeout_ms: 20,
        ..SessionConfig::default()
    };
    let manager = SessionManager::new(config)
        .unwrap()
        .with_clock(clock())
        .with_notifier(Arc::new(FailingNotifier))
        .with_geo_locator(Arc::new(SlowGeoLocator));

    let grant = manager
        .create_session(login(Uuid::new_v4(), laptop(), SF_IP))
        .await
        .unwrap();
    assert!(grant.session.location.is_none());
    assert!(manager.validate_session(&grant.session.token).await.unwrap().is_valid());
}

#[tokio::test]
async fn test_stats_reflect_population() {
    let manager = manager(SessionConfig::default(), clock());
    let user_id = Uuid::new_v4();

    let first = manager.create_session(login(user_id, laptop(), SF_IP)).await.unwrap();
    manager.create_session(login(user_id, phone(), SF_IP)).await.unwrap();
    manager.revoke_session(first.session.id, "logout").await.unwrap();

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.active_sessions, 1);
    assert_eq!(stats.by_status[&SessionStatus::Revoked], 1);
    assert_eq!(stats.by_country["US"], 2);
    assert_eq!(stats.unresolved_alerts, 1);
}
