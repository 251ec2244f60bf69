//! Axum middleware for session authentication
//!
//! - Extract the bearer token from the Authorization header
//! - Validate it against the session manager
//! - Record activity for each request, rotating the token when due
//! - Inject SessionContext into request extensions
//!
//! Mount with `axum::middleware::from_fn_with_state(manager, auth_middleware)`.

use crate::device::DeviceType;
use crate::error::SessionError;
use crate::models::{ActivityOutcome, Metadata, Session, Validation};
use crate::service::SessionManager;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Response header carrying the new access token after a rotation
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Activity action recorded for every authenticated request
pub const API_REQUEST_ACTION: &str = "api_request";

/// The only thing an end user learns about a rejected credential
const SIGN_IN_AGAIN: &str = "please sign in again";

/// Session context injected into request extensions
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub device_type: DeviceType,
    pub mfa_verified: bool,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub metadata: Metadata,
}

impl SessionContext {
    fn new(session: &Session, ip_address: String, user_agent: Option<String>) -> Self {
        Self {
            session_id: session.id,
            user_id: session.user_id,
            device_type: session.device_type,
            mfa_verified: session.mfa_verified,
            ip_address,
            user_agent,
            metadata: session.metadata.clone(),
        }
    }
}

/// Optional session context (for endpoints that don't require auth)
#[derive(Debug, Clone)]
pub struct OptionalSessionContext(pub Option<SessionContext>);

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_token<B>(req: &axum::http::Request<B>) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Extract the client IP, preferring proxy headers
pub fn extract_ip_address<B>(req: &axum::http::Request<B>) -> String {
    // X-Forwarded-For first (for proxies)
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.trim().to_string();
        }
    }

    // Fall back to connection info
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn extract_user_agent<B>(req: &axum::http::Request<B>) -> Option<String> {
    req.headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

/// Request data needed for authentication, owned so the request body is not
/// borrowed across an await
struct Credentials {
    token: Option<String>,
    ip_address: String,
    user_agent: Option<String>,
    resource: String,
}

impl Credentials {
    fn from_request(req: &Request) -> Self {
        Self {
            token: extract_bearer_token(req),
            ip_address: extract_ip_address(req),
            user_agent: extract_user_agent(req),
            resource: format!("{} {}", req.method(), req.uri().path()),
        }
    }
}

/// Validate the token and record the request.
///
/// `Ok(None)` means "not authenticated"; `Err` means the manager could not
/// answer.
async fn authenticate(
    manager: &SessionManager,
    credentials: Credentials,
) -> Result<Option<(SessionContext, Option<String>)>, SessionError> {
    let Some(token) = credentials.token else {
        return Ok(None);
    };

    let session = match manager.validate_session(&token).await? {
        Validation::Valid(session) => session,
        Validation::Rejected(rejection) => {
            debug!("Rejected bearer token: {:?}", rejection);
            return Ok(None);
        }
    };

    let outcome = manager
        .update_activity(
            session.id,
            API_REQUEST_ACTION,
            Some(credentials.resource),
            Some(credentials.ip_address.clone()),
            credentials.user_agent.clone(),
        )
        .await?;

    let rotated = match outcome {
        ActivityOutcome::Recorded => None,
        ActivityOutcome::Rotated { token } => Some(token),
        // Expired or revoked between validation and the activity write
        ActivityOutcome::Inactive => return Ok(None),
    };

    let context = SessionContext::new(&session, credentials.ip_address, credentials.user_agent);
    Ok(Some((context, rotated)))
}

fn with_rotated_token(mut response: Response, token: Option<String>) -> Response {
    if let Some(token) = token {
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(SESSION_TOKEN_HEADER), value);
            }
            Err(e) => error!("Rotated token is not a valid header value: {}", e),
        }
    }
    response
}

fn failure_response(err: &SessionError) -> Response {
    if err.is_retryable() {
        warn!("Session backend unavailable: {}", err);
        (StatusCode::SERVICE_UNAVAILABLE, "service temporarily unavailable").into_response()
    } else {
        error!("Session check failed: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// Session authentication middleware
///
/// Injects SessionContext into request extensions. Returns 401 with a
/// generic body for any missing or rejected token and 503 when the
/// session backend is unavailable.
pub async fn auth_middleware(
    State(manager): State<Arc<SessionManager>>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&manager, Credentials::from_request(&req)).await {
        Ok(Some((context, rotated))) => {
            debug!(
                "Session validated for user {} (session {})",
                context.user_id, context.session_id
            );
            req.extensions_mut().insert(context);
            with_rotated_token(next.run(req).await, rotated)
        }
        Ok(None) => (StatusCode::UNAUTHORIZED, SIGN_IN_AGAIN).into_response(),
        Err(e) => failure_response(&e),
    }
}

/// Optional authentication middleware
///
/// Like [`auth_middleware`] but lets unauthenticated requests through with
/// `OptionalSessionContext(None)`. Backend failures still fail the request.
pub async fn optional_auth_middleware(
    State(manager): State<Arc<SessionManager>>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&manager, Credentials::from_request(&req)).await {
        Ok(Some((context, rotated))) => {
            req.extensions_mut()
                .insert(OptionalSessionContext(Some(context)));
            with_rotated_token(next.run(req).await, rotated)
        }
        Ok(None) => {
            req.extensions_mut().insert(OptionalSessionContext(None));
            next.run(req).await
        }
        Err(e) => failure_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::device::DeviceFingerprint;
    use crate::service::NewSession;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Extension, Router};
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    async fn whoami(Extension(ctx): Extension<SessionContext>) -> String {
        ctx.user_id.to_string()
    }

    async fn maybe(Extension(ctx): Extension<OptionalSessionContext>) -> String {
        ctx.0.map_or_else(|| "anonymous".to_string(), |c| c.user_id.to_string())
    }

    async fn setup() -> (Arc<SessionManager>, Arc<ManualClock>, Session) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = Arc::new(
            SessionManager::new(SessionConfig::default())
                .unwrap()
                .with_clock(clock.clone()),
        );
        let grant = manager
            .create_session(NewSession::new(
                Uuid::new_v4(),
                DeviceFingerprint::from_signals("Mozilla/5.0", "Win32", "en-US", "UTC"),
                "203.0.113.10",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0",
            ))
            .await
            .unwrap();
        (manager, clock, grant.session)
    }

    fn app(manager: Arc<SessionManager>) -> Router {
        Router::new()
            .route("/me", get(whoami))
            .route_layer(from_fn_with_state(manager.clone(), auth_middleware))
            .merge(
                Router::new()
                    .route("/maybe", get(maybe))
                    .route_layer(from_fn_with_state(manager, optional_auth_middleware)),
            )
    }

    fn request(path: &str, token: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder()
            .uri(path)
            .header(header::USER_AGENT, "Mozilla/5.0")
            .header("x-forwarded-for", "203.0.113.10, 10.0.0.1");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_token() {
        let req = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Bearer test_token_123")
            .body(())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), Some("test_token_123".to_string()));

        let basic = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap();
        assert_eq!(extract_bearer_token(&basic), None);
    }

    #[test]
    fn test_extract_ip_prefers_forwarded_for() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
            .header("x-real-ip", "10.0.0.2")
            .body(())
            .unwrap();
        assert_eq!(extract_ip_address(&req), "198.51.100.7");

        let bare = axum::http::Request::builder().body(()).unwrap();
        assert_eq!(extract_ip_address(&bare), "unknown");
    }

    #[test]
    fn test_extract_user_agent() {
        let req = axum::http::Request::builder()
            .header(header::USER_AGENT, "Mozilla/5.0")
            .body(())
            .unwrap();
        assert_eq!(extract_user_agent(&req), Some("Mozilla/5.0".to_string()));
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        let (manager, _clock, session) = setup().await;
        let response = app(manager).oneshot(request("/me", Some(&session.token))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_TOKEN_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_missing_or_unknown_token_is_unauthorized() {
        let (manager, _clock, _session) = setup().await;

        let missing = app(manager.clone()).oneshot(request("/me", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let unknown = app(manager).oneshot(request("/me", Some("forged"))).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_revoked_session_gets_generic_body() {
        let (manager, _clock, session) = setup().await;
        manager.revoke_session(session.id, "logout").await.unwrap();

        let response = app(manager).oneshot(request("/me", Some(&session.token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], SIGN_IN_AGAIN.as_bytes());
    }

    #[tokio::test]
    async fn test_rotation_sets_header() {
        let (manager, clock, session) = setup().await;
        clock.advance(Duration::minutes(20));

        let response = app(manager.clone())
            .oneshot(request("/me", Some(&session.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let rotated = response
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert_ne!(rotated, session.token);
        assert!(manager.validate_session(&rotated).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_optional_auth_lets_anonymous_through() {
        let (manager, _clock, session) = setup().await;

        let anonymous = app(manager.clone()).oneshot(request("/maybe", None)).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::OK);
        let body = axum::body::to_bytes(anonymous.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"anonymous");

        let known = app(manager).oneshot(request("/maybe", Some(&session.token))).await.unwrap();
        let body = axum::body::to_bytes(known.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], session.user_id.to_string().as_bytes());
    }
}
