use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{Json, extract::State, http::StatusCode};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState, ReviewStatus,
    models::is_plausible_email,
    responses::{ApiResult, HandlerError, internal_error, json_error, write_error},
};

pub const SESSION_COOKIE: &str = "club_session";
pub const SESSION_TTL_DAYS: i64 = 7;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signing and verification keys for member session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(&self, member_id: Uuid, now: DateTime<Utc>) -> jsonwebtoken::errors::Result<String> {
        let claims = SessionClaims {
            sub: member_id,
            iat: now.timestamp(),
            exp: (now + ChronoDuration::days(SESSION_TTL_DAYS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .ok()
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct SessionMember {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub student_number: String,
    pub department: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl SessionMember {
    pub fn review_status(&self) -> ReviewStatus {
        self.status.parse().unwrap_or(ReviewStatus::Pending)
    }
}

#[derive(sqlx::FromRow)]
struct MemberCredentials {
    id: Uuid,
    password_hash: String,
    status: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub student_number: String,
    #[serde(default)]
    pub department: Option<String>,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoggedOut {
    pub logged_out: bool,
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<SessionMember>), HandlerError> {
    let full_name = payload.full_name.trim();
    if full_name.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "Full name is required."));
    }

    let email = normalize_email(&payload.email);
    if !is_plausible_email(&email) {
        return Err(json_error(StatusCode::BAD_REQUEST, "A valid email is required."));
    }

    let student_number = payload.student_number.trim();
    if !is_valid_student_number(student_number) {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Student number must be 4-20 letters or digits.",
        ));
    }

    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters."),
        ));
    }

    let password_hash = hash_password(&payload.password)
        .map_err(|err| internal_error(err, "failed to hash password during registration"))?;

    let department = payload
        .department
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let member = sqlx::query_as::<_, SessionMember>(
        "INSERT INTO members (id, full_name, email, student_number, department, password_hash, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, full_name, email, student_number, department, status, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(&email)
    .bind(student_number)
    .bind(department)
    .bind(password_hash)
    .bind(ReviewStatus::Pending.as_str())
    .fetch_one(state.pool())
    .await
    .map_err(|err| {
        write_error(
            err,
            "An account with this email or student number already exists.",
            "failed to insert member",
        )
    })?;

    info!(member_id = %member.id, "membership application received");

    let jar = jar.add(session_cookie(&state, member.id)?);
    Ok((StatusCode::CREATED, jar, Json(member)))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionMember>), HandlerError> {
    let email = normalize_email(&payload.email);

    let credentials = sqlx::query_as::<_, MemberCredentials>(
        "SELECT id, password_hash, status FROM members WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to fetch member during login"))?;

    let Some(credentials) = credentials else {
        return Err(invalid_credentials());
    };

    if !verify_password(&payload.password, &credentials.password_hash) {
        return Err(invalid_credentials());
    }

    if is_locked_out(&credentials.status) {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "This account is not allowed to sign in.",
        ));
    }

    let member = fetch_member(state.pool(), credentials.id)
        .await
        .map_err(|err| internal_error(err, "failed to load member after login"))?
        .ok_or_else(invalid_credentials)?;

    let jar = jar.add(session_cookie(&state, member.id)?);
    Ok((jar, Json(member)))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<LoggedOut>) {
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_secure(state.cookie_secure());
    removal.set_max_age(CookieDuration::seconds(0));

    (jar.remove(removal), Json(LoggedOut { logged_out: true }))
}

pub async fn me(State(state): State<AppState>, jar: CookieJar) -> ApiResult<SessionMember> {
    current_member(&state, &jar).await.map(Json)
}

/// Resolves the signed-in member from the session cookie.
pub async fn current_member(state: &AppState, jar: &CookieJar) -> Result<SessionMember, HandlerError> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Err(json_error(StatusCode::UNAUTHORIZED, "Sign in required."));
    };

    let Some(claims) = state.sessions().verify(cookie.value()) else {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "Session expired. Please sign in again.",
        ));
    };

    let member = fetch_member(state.pool(), claims.sub)
        .await
        .map_err(|err| internal_error(err, "failed to resolve session member"))?
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "Sign in required."))?;

    if is_locked_out(&member.status) {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "This account is not allowed to sign in.",
        ));
    }

    Ok(member)
}

/// Like [`current_member`], but only approved members pass.
pub async fn approved_member(state: &AppState, jar: &CookieJar) -> Result<SessionMember, HandlerError> {
    let member = current_member(state, jar).await?;
    if member.review_status() != ReviewStatus::Approved {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "Your membership has not been approved yet.",
        ));
    }
    Ok(member)
}

pub async fn fetch_member(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<SessionMember>> {
    sqlx::query_as::<_, SessionMember>(
        "SELECT id, full_name, email, student_number, department, status, created_at
         FROM members WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

fn session_cookie(state: &AppState, member_id: Uuid) -> Result<Cookie<'static>, HandlerError> {
    let token = state.sessions().issue(member_id, Utc::now()).map_err(|err| {
        error!(?err, "failed to sign session token");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
    })?;

    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(state.cookie_secure());
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));
    Ok(cookie)
}

fn is_locked_out(status: &str) -> bool {
    matches!(
        status.parse::<ReviewStatus>(),
        Ok(ReviewStatus::Rejected | ReviewStatus::Cancelled)
    )
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_student_number(value: &str) -> bool {
    (4..=20).contains(&value.len()) && value.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

fn invalid_credentials() -> HandlerError {
    json_error(StatusCode::UNAUTHORIZED, "Invalid email or password.")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-that-is-long-enough-for-hs256";

    #[test]
    fn session_token_round_trip() {
        let keys = SessionKeys::new(SECRET);
        let member_id = Uuid::new_v4();
        let token = keys.issue(member_id, Utc::now()).unwrap();

        let claims = keys.verify(&token).expect("valid token");
        assert_eq!(claims.sub, member_id);
        assert_eq!(claims.exp - claims.iat, SESSION_TTL_DAYS * 24 * 60 * 60);
    }

    #[test]
    fn session_token_rejects_other_secret_and_expiry() {
        let keys = SessionKeys::new(SECRET);
        let token = keys.issue(Uuid::new_v4(), Utc::now()).unwrap();
        assert!(SessionKeys::new(b"another-secret-another-secret-xx").verify(&token).is_none());

        let stale = keys
            .issue(Uuid::new_v4(), Utc::now() - ChronoDuration::days(SESSION_TTL_DAYS + 1))
            .unwrap();
        assert!(keys.verify(&stale).is_none());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn student_number_rules() {
        assert!(is_valid_student_number("20231234"));
        assert!(is_valid_student_number("B21X0042"));
        assert!(!is_valid_student_number("123"));
        assert!(!is_valid_student_number("2023 1234"));
    }

    #[test]
    fn lockout_applies_to_closed_accounts() {
        assert!(is_locked_out("rejected"));
        assert!(is_locked_out("cancelled"));
        assert!(!is_locked_out("pending"));
        assert!(!is_locked_out("approved"));
    }
}
