mod limiter;

pub use limiter::{AttemptLimiter, MAX_FAILED_ATTEMPTS};

use std::{fmt, sync::Arc, time::Instant};

use axum::{
    Json,
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{self, AUTHORIZATION, REFERER},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::web::ApiError;

const REALM_CHALLENGE: &str = r#"Basic realm="Club Admin", charset="UTF-8""#;
const UNKNOWN_CLIENT: &str = "unknown";

const ADMIN_PREFIXES: &[&str] = &["/admin", "/api/admin"];
const BYPASS_PREFIXES: &[&str] = &[
    "/api/auth",
    "/api/comments",
    "/api/projects",
    "/api/forum",
    "/api/analytics/track",
];

/// Admin username/password pair. Only SHA-256 digests are compared, so
/// neither the contents nor the length of the secrets affects timing.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    username_digest: [u8; 32],
    password_digest: [u8; 32],
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        let password = password.into();
        Self {
            username_digest: digest(&username),
            password_digest: digest(&password),
            username,
        }
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username_digest.ct_eq(&digest(username));
        let pass_ok = self.password_digest.ct_eq(&digest(password));
        (user_ok & pass_ok).into()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the gate treats a request before it reaches a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Non-API paths and read-only API calls.
    Open,
    /// Member-facing mutations that authenticate with the session cookie.
    Bypassed,
    /// Mutation issued from an admin page.
    RefererTrusted,
    /// Requires Basic credentials and is subject to the attempt counter.
    Guarded,
}

pub fn classify(method: &Method, path: &str, referer: Option<&str>) -> Access {
    if ADMIN_PREFIXES.iter().any(|prefix| is_under(path, prefix)) {
        return Access::Guarded;
    }

    if !is_under(path, "/api") || is_read_only(method) {
        return Access::Open;
    }

    if BYPASS_PREFIXES.iter().any(|prefix| is_under(path, prefix)) || is_event_registration(path)
    {
        return Access::Bypassed;
    }

    if referer.is_some_and(|value| value.contains("/admin")) {
        return Access::RefererTrusted;
    }

    Access::Guarded
}

fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn is_read_only(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn is_event_registration(path: &str) -> bool {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    matches!(
        segments.as_slice(),
        ["", "api", "events", id, "register"] if !id.is_empty()
    )
}

/// Client address as reported by the fronting proxy.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Decodes an `Authorization: Basic ...` header into `(username, password)`.
pub fn parse_basic_credentials(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    MissingCredentials,
    InvalidCredentials,
    TooManyAttempts,
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        match self {
            Denial::MissingCredentials | Denial::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, REALM_CHALLENGE)],
                Json(ApiError::new("Authentication required.")),
            )
                .into_response(),
            Denial::TooManyAttempts => (
                StatusCode::FORBIDDEN,
                Json(ApiError::new(
                    "Too many failed login attempts. Try again later.",
                )),
            )
                .into_response(),
        }
    }
}

/// Shared gate state: credentials plus the per-IP attempt counter.
#[derive(Clone)]
pub struct RequestGate {
    credentials: Arc<AdminCredentials>,
    limiter: AttemptLimiter,
}

impl RequestGate {
    pub fn new(credentials: AdminCredentials) -> Self {
        Self::with_limiter(credentials, AttemptLimiter::default())
    }

    pub fn with_limiter(credentials: AdminCredentials, limiter: AttemptLimiter) -> Self {
        Self {
            credentials: Arc::new(credentials),
            limiter,
        }
    }

    pub fn limiter(&self) -> &AttemptLimiter {
        &self.limiter
    }

    /// Refuses every non-open request from an IP whose attempt window is exhausted.
    pub fn check_lockout(&self, ip: &str, now: Instant) -> Result<(), Denial> {
        if self.limiter.is_blocked(ip, now) {
            warn!(%ip, "request rejected: attempt window exhausted");
            return Err(Denial::TooManyAttempts);
        }
        Ok(())
    }

    /// Runs the counter check and credential check for one guarded request.
    pub fn authorize(
        &self,
        ip: &str,
        authorization: Option<&str>,
        now: Instant,
    ) -> Result<(), Denial> {
        self.check_lockout(ip, now)?;

        let Some(header_value) = authorization else {
            return Err(Denial::MissingCredentials);
        };

        match parse_basic_credentials(header_value) {
            Some((username, password)) if self.credentials.matches(&username, &password) => {
                self.limiter.clear(ip);
                Ok(())
            }
            _ => {
                let failures = self.limiter.record_failure(ip, now);
                warn!(%ip, failures, "admin authentication failed");
                Err(Denial::InvalidCredentials)
            }
        }
    }
}

pub async fn enforce(State(gate): State<RequestGate>, request: Request, next: Next) -> Response {
    let headers = request.headers();
    let referer = headers.get(REFERER).and_then(|value| value.to_str().ok());
    let access = classify(request.method(), request.uri().path(), referer);
    let ip = client_ip(headers);

    let lockout = match access {
        Access::Open => Ok(()),
        Access::Bypassed | Access::RefererTrusted | Access::Guarded => {
            gate.check_lockout(&ip, Instant::now())
        }
    };

    let mut response = match (access, lockout) {
        (_, Err(denial)) => denial.into_response(),
        (Access::Guarded, Ok(())) => {
            let authorization = headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok());
            match gate.authorize(&ip, authorization, Instant::now()) {
                Ok(()) => next.run(request).await,
                Err(denial) => denial.into_response(),
            }
        }
        (Access::RefererTrusted, Ok(())) => {
            info!(path = %request.uri().path(), "forwarding mutation from admin referer");
            next.run(request).await
        }
        (Access::Open | Access::Bypassed, Ok(())) => next.run(request).await,
    };

    apply_security_headers(response.headers_mut());
    response
}

fn apply_security_headers(headers: &mut HeaderMap) {
    let pairs: [(header::HeaderName, &'static str); 4] = [
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_FRAME_OPTIONS, "DENY"),
        (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
        (
            header::HeaderName::from_static("permissions-policy"),
            "camera=(), microphone=(), geolocation=()",
        ),
    ];
    for (name, value) in pairs {
        headers
            .entry(name)
            .or_insert(HeaderValue::from_static(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::Request as HttpRequest,
        middleware,
        routing::{get, post, put},
    };
    use tower::ServiceExt;

    fn gate() -> RequestGate {
        RequestGate::new(AdminCredentials::new("board", "s3cret-pass"))
    }

    fn stub_router(gate: RequestGate) -> Router {
        Router::new()
            .route("/admin", get(|| async { "dashboard" }))
            .route(
                "/api/announcements",
                get(|| async { "list" }).post(|| async { "created" }),
            )
            .route("/api/comments", post(|| async { "commented" }))
            .route("/api/events/:id/register", post(|| async { "registered" }))
            .route("/api/sponsors/:id", put(|| async { "updated" }))
            .layer(middleware::from_fn_with_state(gate, enforce))
    }

    fn basic(username: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
    }

    fn request(method: Method, uri: &str, ip: &str, auth: Option<String>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", ip);
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn classify_admin_paths_are_always_guarded() {
        assert_eq!(classify(&Method::GET, "/admin", None), Access::Guarded);
        assert_eq!(
            classify(&Method::GET, "/admin/members", None),
            Access::Guarded
        );
        assert_eq!(
            classify(&Method::GET, "/api/admin/analytics", Some("https://club/admin")),
            Access::Guarded
        );
        assert_eq!(classify(&Method::GET, "/administrator", None), Access::Open);
    }

    #[test]
    fn classify_reads_and_pages_are_open() {
        assert_eq!(classify(&Method::GET, "/api/events", None), Access::Open);
        assert_eq!(classify(&Method::POST, "/healthz", None), Access::Open);
        assert_eq!(classify(&Method::HEAD, "/api/sponsors", None), Access::Open);
    }

    #[test]
    fn classify_member_mutations_bypass_credentials() {
        assert_eq!(
            classify(&Method::POST, "/api/auth/login", None),
            Access::Bypassed
        );
        assert_eq!(
            classify(&Method::DELETE, "/api/comments/abc", None),
            Access::Bypassed
        );
        assert_eq!(
            classify(&Method::POST, "/api/forum/votes", None),
            Access::Bypassed
        );
        assert_eq!(
            classify(&Method::POST, "/api/events/42/register", None),
            Access::Bypassed
        );
        assert_eq!(
            classify(&Method::DELETE, "/api/events/42", None),
            Access::Guarded
        );
        assert_eq!(
            classify(&Method::POST, "/api/authorize", None),
            Access::Guarded
        );
    }

    #[test]
    fn classify_trusts_admin_referer_for_other_mutations() {
        assert_eq!(
            classify(
                &Method::PUT,
                "/api/sponsors/1",
                Some("https://club.example/admin/sponsors")
            ),
            Access::RefererTrusted
        );
        assert_eq!(
            classify(&Method::PUT, "/api/sponsors/1", Some("https://club.example/")),
            Access::Guarded
        );
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.7"));
        assert_eq!(client_ip(&headers), "192.0.2.7");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn parse_basic_credentials_decodes_header() {
        let header = basic("board", "pa:ss");
        assert_eq!(
            parse_basic_credentials(&header),
            Some(("board".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic_credentials("Bearer abc"), None);
        assert_eq!(parse_basic_credentials("Basic !!!"), None);
    }

    #[test]
    fn credentials_match_only_exact_pair() {
        let credentials = AdminCredentials::new("board", "s3cret-pass");
        assert!(credentials.matches("board", "s3cret-pass"));
        assert!(!credentials.matches("board", "s3cret-pas"));
        assert!(!credentials.matches("b", "s3cret-pass"));
        assert!(!credentials.matches("board", ""));
        assert!(!credentials.matches("s3cret-pass", "board"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", AdminCredentials::new("board", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn admin_requires_basic_credentials() {
        let app = stub_router(gate());

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/admin", "198.51.100.1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(
            response.headers().get(header::X_FRAME_OPTIONS).unwrap(),
            "DENY"
        );

        let response = app
            .oneshot(request(
                Method::GET,
                "/admin",
                "198.51.100.1",
                Some(basic("board", "s3cret-pass")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::X_CONTENT_TYPE_OPTIONS)
                .unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn sixth_attempt_in_window_is_forbidden() {
        let gate = gate();
        let app = stub_router(gate.clone());

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let response = app
                .clone()
                .oneshot(request(
                    Method::GET,
                    "/admin",
                    "198.51.100.2",
                    Some(basic("board", "wrong")),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/admin",
                "198.51.100.2",
                Some(basic("board", "s3cret-pass")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let other_client = app
            .oneshot(request(
                Method::GET,
                "/admin",
                "198.51.100.3",
                Some(basic("board", "s3cret-pass")),
            ))
            .await
            .unwrap();
        assert_eq!(other_client.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn valid_credentials_clear_failures() {
        let gate = gate();
        let app = stub_router(gate.clone());

        for _ in 0..MAX_FAILED_ATTEMPTS - 1 {
            app.clone()
                .oneshot(request(
                    Method::GET,
                    "/admin",
                    "198.51.100.4",
                    Some(basic("board", "nope")),
                ))
                .await
                .unwrap();
        }
        assert_eq!(gate.limiter().tracked_keys(), 1);

        let response = app
            .oneshot(request(
                Method::GET,
                "/admin",
                "198.51.100.4",
                Some(basic("board", "s3cret-pass")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(gate.limiter().tracked_keys(), 0);
    }

    #[tokio::test]
    async fn mutating_api_calls_are_guarded_unless_bypassed() {
        let app = stub_router(gate());

        let read = app
            .clone()
            .oneshot(request(Method::GET, "/api/announcements", "203.0.113.1", None))
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);

        let write = app
            .clone()
            .oneshot(request(Method::POST, "/api/announcements", "203.0.113.1", None))
            .await
            .unwrap();
        assert_eq!(write.status(), StatusCode::UNAUTHORIZED);

        let comment = app
            .clone()
            .oneshot(request(Method::POST, "/api/comments", "203.0.113.1", None))
            .await
            .unwrap();
        assert_eq!(comment.status(), StatusCode::OK);

        let registration = app
            .oneshot(request(
                Method::POST,
                "/api/events/7/register",
                "203.0.113.1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(registration.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_credentials_do_not_count_as_failures() {
        let gate = gate();
        let app = stub_router(gate.clone());

        for _ in 0..(MAX_FAILED_ATTEMPTS + 2) {
            let response = app
                .clone()
                .oneshot(request(Method::GET, "/admin", "198.51.100.9", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(gate.limiter().tracked_keys(), 0);
    }

    #[tokio::test]
    async fn locked_out_ip_cannot_use_bypassed_or_referer_routes() {
        let app = stub_router(gate());
        let ip = "192.0.2.99";

        for _ in 0..MAX_FAILED_ATTEMPTS {
            app.clone()
                .oneshot(request(Method::GET, "/admin", ip, Some(basic("board", "wrong"))))
                .await
                .unwrap();
        }

        let comment = app
            .clone()
            .oneshot(request(Method::POST, "/api/comments", ip, None))
            .await
            .unwrap();
        assert_eq!(comment.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            comment.headers().get(header::X_FRAME_OPTIONS).unwrap(),
            "DENY"
        );

        let mut trusted = request(Method::PUT, "/api/sponsors/1", ip, None);
        trusted.headers_mut().insert(
            REFERER,
            HeaderValue::from_static("https://club.example/admin/sponsors"),
        );
        let trusted = app.clone().oneshot(trusted).await.unwrap();
        assert_eq!(trusted.status(), StatusCode::FORBIDDEN);

        let read = app
            .clone()
            .oneshot(request(Method::GET, "/api/announcements", ip, None))
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);

        let other = app
            .oneshot(request(Method::POST, "/api/comments", "192.0.2.100", None))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }
}
