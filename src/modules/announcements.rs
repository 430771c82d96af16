use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState, LocalizedText,
    responses::{ApiResult, Deleted, HandlerError, internal_error, not_found, write_error},
};

use super::{clamp_limit, require_localized, resolve_slug};

const SELECT_COLUMNS: &str =
    "id, slug, title, body, pinned, published, published_at, created_at, updated_at";
const SLUG_TAKEN: &str = "An announcement with this slug already exists.";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AnnouncementRow {
    pub id: Uuid,
    pub slug: String,
    pub title: SqlJson<LocalizedText>,
    pub body: SqlJson<LocalizedText>,
    pub pinned: bool,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub(crate) struct AnnouncementInput {
    #[serde(default)]
    slug: Option<String>,
    title: LocalizedText,
    body: LocalizedText,
    #[serde(default)]
    pinned: bool,
    #[serde(default = "default_published")]
    published: bool,
}

fn default_published() -> bool {
    true
}

#[derive(Default, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/announcements",
            get(list_announcements).post(create_announcement),
        )
        .route(
            "/api/announcements/:id",
            get(get_announcement)
                .put(update_announcement)
                .delete(delete_announcement),
        )
}

async fn list_announcements(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<AnnouncementRow>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM announcements
         WHERE published
         ORDER BY pinned DESC, published_at DESC NULLS LAST, created_at DESC
         LIMIT $1"
    );
    sqlx::query_as::<_, AnnouncementRow>(&sql)
        .bind(clamp_limit(query.limit, 50, 200))
        .fetch_all(state.pool())
        .await
        .map(Json)
        .map_err(|err| internal_error(err, "failed to list announcements"))
}

async fn get_announcement(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<AnnouncementRow> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM announcements WHERE slug = $1 AND published");
    sqlx::query_as::<_, AnnouncementRow>(&sql)
        .bind(slug)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to load announcement"))?
        .map(Json)
        .ok_or_else(|| not_found("Announcement"))
}

struct ValidAnnouncement {
    slug: String,
    title: LocalizedText,
    body: LocalizedText,
    pinned: bool,
    published: bool,
}

fn validate(input: AnnouncementInput, locale: &str) -> Result<ValidAnnouncement, HandlerError> {
    let title = require_localized(input.title, "Title")?;
    let body = require_localized(input.body, "Body")?;
    let slug = resolve_slug(input.slug.as_deref(), &title, locale)?;
    Ok(ValidAnnouncement {
        slug,
        title,
        body,
        pinned: input.pinned,
        published: input.published,
    })
}

async fn create_announcement(
    State(state): State<AppState>,
    Json(input): Json<AnnouncementInput>,
) -> Result<(StatusCode, Json<AnnouncementRow>), HandlerError> {
    let announcement = validate(input, state.default_locale())?;

    let sql = format!(
        "INSERT INTO announcements (id, slug, title, body, pinned, published, published_at)
         VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $6 THEN NOW() END)
         RETURNING {SELECT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, AnnouncementRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(&announcement.slug)
        .bind(SqlJson(&announcement.title))
        .bind(SqlJson(&announcement.body))
        .bind(announcement.pinned)
        .bind(announcement.published)
        .fetch_one(state.pool())
        .await
        .map_err(|err| write_error(err, SLUG_TAKEN, "failed to create announcement"))?;

    info!(announcement_id = %row.id, slug = %row.slug, "announcement created");
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_announcement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<AnnouncementInput>,
) -> ApiResult<AnnouncementRow> {
    let announcement = validate(input, state.default_locale())?;

    let sql = format!(
        "UPDATE announcements
         SET slug = $2, title = $3, body = $4, pinned = $5, published = $6,
             published_at = CASE
                 WHEN NOT $6 THEN NULL
                 WHEN published_at IS NULL THEN NOW()
                 ELSE published_at
             END,
             updated_at = NOW()
         WHERE id = $1
         RETURNING {SELECT_COLUMNS}"
    );
    sqlx::query_as::<_, AnnouncementRow>(&sql)
        .bind(id)
        .bind(&announcement.slug)
        .bind(SqlJson(&announcement.title))
        .bind(SqlJson(&announcement.body))
        .bind(announcement.pinned)
        .bind(announcement.published)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| write_error(err, SLUG_TAKEN, "failed to update announcement"))?
        .map(Json)
        .ok_or_else(|| not_found("Announcement"))
}

async fn delete_announcement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete announcement"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Announcement"));
    }

    sqlx::query("DELETE FROM comments WHERE target_type = 'announcement' AND target_id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete announcement comments"))?;

    Ok(Deleted::json())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(slug: Option<&str>, title: &[(&str, &str)], body: &[(&str, &str)]) -> AnnouncementInput {
        AnnouncementInput {
            slug: slug.map(str::to_string),
            title: LocalizedText::from_pairs(title.iter().copied()),
            body: LocalizedText::from_pairs(body.iter().copied()),
            pinned: false,
            published: true,
        }
    }

    #[test]
    fn blank_body_is_rejected() {
        let result = validate(input(None, &[("en", "Room change")], &[("en", "  "), ("tr", "")]), "en");
        let (status, Json(error)) = result.err().unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error.error.starts_with("Body"));
    }

    #[test]
    fn slug_is_derived_from_default_locale_title() {
        let valid = validate(
            input(None, &[("tr", "Bahar Şenliği"), ("en", "Spring Fest!")], &[("en", "See you there")]),
            "en",
        )
        .unwrap();
        assert_eq!(valid.slug, "spring-fest");
    }

    #[test]
    fn titles_that_differ_only_in_punctuation_share_a_slug() {
        // The unique index reports these as a 409 on insert.
        let first = validate(input(None, &[("en", "Demo Day")], &[("en", "a")]), "en").unwrap();
        let second = validate(input(None, &[("en", "Demo -- Day!")], &[("en", "b")]), "en").unwrap();
        assert_eq!(first.slug, second.slug);
        assert!(SLUG_TAKEN.contains("slug"));
    }

    #[test]
    fn malformed_explicit_slug_is_rejected() {
        let result = validate(input(Some("Demo Day"), &[("en", "Demo Day")], &[("en", "a")]), "en");
        assert_eq!(result.err().map(|(status, _)| status), Some(StatusCode::BAD_REQUEST));
    }
}
