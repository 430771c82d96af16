use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::web::{
    AppState,
    models::is_http_url,
    responses::{
        ApiResult, Deleted, HandlerError, bad_request, internal_error, json_error, not_found,
    },
};

const TOKEN_BYTES: usize = 32;
const MAX_EXPIRY_DAYS: i64 = 365;
/// Expired tokens are kept this long for the admin listing before purge.
pub const EXPIRED_TOKEN_RETENTION_DAYS: i64 = 30;

const TOKEN_COLUMNS: &str =
    "id, token, label, expires_at, max_downloads, download_count, revoked_at, created_at";
const ASSET_COLUMNS: &str = "id, title, url, kind, display_order, created_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub token: String,
    pub label: String,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: Option<i32>,
    pub download_count: i32,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AssetRow {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub kind: String,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MediaKit {
    pub label: String,
    pub expires_at: DateTime<Utc>,
    pub downloads_remaining: Option<i32>,
    pub assets: Vec<AssetRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    Revoked,
    Expired,
    Exhausted,
}

impl TokenRow {
    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        if self.revoked_at.is_some() {
            TokenState::Revoked
        } else if self.expires_at <= now {
            TokenState::Expired
        } else if self
            .max_downloads
            .is_some_and(|max| self.download_count >= max)
        {
            TokenState::Exhausted
        } else {
            TokenState::Valid
        }
    }
}

/// Revoked links look like they never existed; used-up ones report 410.
fn refusal(state: TokenState) -> Option<HandlerError> {
    match state {
        TokenState::Valid => None,
        TokenState::Revoked => Some(not_found("Media kit link")),
        TokenState::Expired => Some(json_error(StatusCode::GONE, "This media kit link has expired.")),
        TokenState::Exhausted => Some(json_error(
            StatusCode::GONE,
            "This media kit link has reached its download limit.",
        )),
    }
}

#[derive(Deserialize)]
pub(crate) struct NewToken {
    label: String,
    expires_in_days: i64,
    #[serde(default)]
    max_downloads: Option<i32>,
}

#[derive(Deserialize)]
pub(crate) struct NewAsset {
    title: String,
    url: String,
    kind: String,
    #[serde(default)]
    display_order: i32,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/admin/media-kit/tokens",
            get(list_tokens).post(create_token),
        )
        .route("/api/admin/media-kit/tokens/:id", delete(revoke_token))
        .route(
            "/api/admin/media-kit/assets",
            get(list_assets).post(create_asset),
        )
        .route("/api/admin/media-kit/assets/:id", delete(delete_asset))
        .route("/api/media-kit/:token", get(open_media_kit))
}

/// Random 32-byte URL-safe share token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub async fn purge_stale_tokens(pool: &PgPool, now: DateTime<Utc>) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM media_kit_tokens WHERE expires_at < $1")
        .bind(now - Duration::days(EXPIRED_TOKEN_RETENTION_DAYS))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

async fn list_tokens(State(state): State<AppState>) -> ApiResult<Vec<TokenRow>> {
    let sql = format!("SELECT {TOKEN_COLUMNS} FROM media_kit_tokens ORDER BY created_at DESC");
    sqlx::query_as::<_, TokenRow>(&sql)
        .fetch_all(state.pool())
        .await
        .map(Json)
        .map_err(|err| internal_error(err, "failed to list media kit tokens"))
}

async fn create_token(
    State(state): State<AppState>,
    Json(input): Json<NewToken>,
) -> Result<(StatusCode, Json<TokenRow>), HandlerError> {
    let label = input.label.trim().to_string();
    if label.is_empty() {
        return Err(bad_request("Label is required."));
    }
    if !(1..=MAX_EXPIRY_DAYS).contains(&input.expires_in_days) {
        return Err(bad_request(format!(
            "expires_in_days must be between 1 and {MAX_EXPIRY_DAYS}."
        )));
    }
    if input.max_downloads.is_some_and(|max| max <= 0) {
        return Err(bad_request("max_downloads must be positive."));
    }

    let sql = format!(
        "INSERT INTO media_kit_tokens (id, token, label, expires_at, max_downloads)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {TOKEN_COLUMNS}"
    );
    let row = sqlx::query_as::<_, TokenRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(generate_token())
        .bind(&label)
        .bind(Utc::now() + Duration::days(input.expires_in_days))
        .bind(input.max_downloads)
        .fetch_one(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to create media kit token"))?;

    info!(token_id = %row.id, %label, expires_at = %row.expires_at, "media kit link created");
    Ok((StatusCode::CREATED, Json(row)))
}

async fn revoke_token(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let result = sqlx::query(
        "UPDATE media_kit_tokens SET revoked_at = COALESCE(revoked_at, NOW()) WHERE id = $1",
    )
    .bind(id)
    .execute(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to revoke media kit token"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Media kit link"));
    }
    info!(token_id = %id, "media kit link revoked");
    Ok(Deleted::json())
}

async fn fetch_assets(pool: &PgPool) -> Result<Vec<AssetRow>, HandlerError> {
    let sql = format!("SELECT {ASSET_COLUMNS} FROM media_kit_assets ORDER BY display_order, title");
    sqlx::query_as::<_, AssetRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(|err| internal_error(err, "failed to list media kit assets"))
}

async fn list_assets(State(state): State<AppState>) -> ApiResult<Vec<AssetRow>> {
    fetch_assets(state.pool()).await.map(Json)
}

async fn create_asset(
    State(state): State<AppState>,
    Json(input): Json<NewAsset>,
) -> Result<(StatusCode, Json<AssetRow>), HandlerError> {
    let title = input.title.trim();
    let kind = input.kind.trim().to_lowercase();
    if title.is_empty() || kind.is_empty() {
        return Err(bad_request("Title and kind are required."));
    }
    if !is_http_url(&input.url) {
        return Err(bad_request("Asset URL must be an http(s) URL."));
    }

    let sql = format!(
        "INSERT INTO media_kit_assets (id, title, url, kind, display_order)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {ASSET_COLUMNS}"
    );
    let row = sqlx::query_as::<_, AssetRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(input.url.trim())
        .bind(&kind)
        .bind(input.display_order)
        .fetch_one(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to create media kit asset"))?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn delete_asset(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let result = sqlx::query("DELETE FROM media_kit_assets WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete media kit asset"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Media kit asset"));
    }
    Ok(Deleted::json())
}

async fn open_media_kit(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<MediaKit> {
    let sql = format!("SELECT {TOKEN_COLUMNS} FROM media_kit_tokens WHERE token = $1");
    let row = sqlx::query_as::<_, TokenRow>(&sql)
        .bind(&token)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to load media kit token"))?
        .ok_or_else(|| not_found("Media kit link"))?;

    if let Some(err) = refusal(row.state(Utc::now())) {
        warn!(token_id = %row.id, "refused media kit download");
        return Err(err);
    }

    // Validity is re-checked in the UPDATE so concurrent downloads stay within the limit.
    let claimed: Option<i32> = sqlx::query_scalar(
        "UPDATE media_kit_tokens
         SET download_count = download_count + 1
         WHERE id = $1
           AND revoked_at IS NULL
           AND expires_at > NOW()
           AND (max_downloads IS NULL OR download_count < max_downloads)
         RETURNING download_count",
    )
    .bind(row.id)
    .fetch_optional(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to count media kit download"))?;

    let Some(download_count) = claimed else {
        return Err(json_error(
            StatusCode::GONE,
            "This media kit link is no longer available.",
        ));
    };

    let assets = fetch_assets(state.pool()).await?;
    Ok(Json(MediaKit {
        label: row.label,
        expires_at: row.expires_at,
        downloads_remaining: row.max_downloads.map(|max| (max - download_count).max(0)),
        assets,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: Duration, max_downloads: Option<i32>, download_count: i32) -> TokenRow {
        let now = Utc::now();
        TokenRow {
            id: Uuid::new_v4(),
            token: generate_token(),
            label: "Sponsor pack".into(),
            expires_at: now + expires_in,
            max_downloads,
            download_count,
            revoked_at: None,
            created_at: now,
        }
    }

    #[test]
    fn generated_tokens_are_url_safe_and_unique() {
        let first = generate_token();
        let second = generate_token();
        assert_ne!(first, second);
        // 32 bytes without padding
        assert_eq!(first.len(), 43);
        assert!(
            first
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn token_state_checks_limits() {
        let now = Utc::now();
        assert_eq!(token(Duration::days(1), Some(3), 2).state(now), TokenState::Valid);
        assert_eq!(token(Duration::days(1), None, 500).state(now), TokenState::Valid);
        assert_eq!(token(Duration::days(1), Some(3), 3).state(now), TokenState::Exhausted);
        assert_eq!(token(-Duration::minutes(1), None, 0).state(now), TokenState::Expired);
    }

    #[test]
    fn revoked_tokens_read_as_missing() {
        let mut row = token(Duration::days(1), None, 0);
        row.revoked_at = Some(Utc::now());
        let state = row.state(Utc::now());
        assert_eq!(state, TokenState::Revoked);
        assert_eq!(refusal(state).map(|(status, _)| status), Some(StatusCode::NOT_FOUND));
        assert_eq!(
            refusal(TokenState::Expired).map(|(status, _)| status),
            Some(StatusCode::GONE)
        );
        assert!(refusal(TokenState::Valid).is_none());
    }
}
