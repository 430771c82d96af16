use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, types::Json as SqlJson};
use uuid::Uuid;

use crate::web::{
    AppState, LocalizedText,
    responses::{ApiResult, HandlerError, bad_request, internal_error},
};

use super::events::UPCOMING_PREDICATE;

const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_WINDOW_DAYS: i64 = 365;
const MAX_PATH_CHARS: usize = 512;
const MAX_REFERRER_CHARS: usize = 1024;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EventPopularity {
    pub id: Uuid,
    pub slug: String,
    pub title: SqlJson<LocalizedText>,
    pub registrations: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PathViews {
    pub path: String,
    pub views: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DailyViews {
    pub day: NaiveDate,
    pub views: i64,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    pub window_days: i64,
    pub since: DateTime<Utc>,
    pub members_by_status: Vec<StatusCount>,
    pub upcoming_events: i64,
    pub past_events: i64,
    pub top_events: Vec<EventPopularity>,
    pub forum_topics: i64,
    pub forum_replies: i64,
    pub comments: i64,
    pub page_views: i64,
    pub top_paths: Vec<PathViews>,
    pub views_per_day: Vec<DailyViews>,
}

#[derive(Default, Deserialize)]
pub(crate) struct SummaryQuery {
    #[serde(default)]
    days: Option<i64>,
}

#[derive(Deserialize)]
pub(crate) struct PageView {
    path: String,
    #[serde(default)]
    referrer: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/analytics/track", post(track))
        .route("/api/admin/analytics", get(summary))
}

pub fn window_days(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, MAX_WINDOW_DAYS)
}

/// Keeps the path component of a tracked URL; rejects anything not rooted at `/`.
pub fn clean_path(raw: &str) -> Option<String> {
    let path = raw.trim();
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if !path.starts_with('/') || path.chars().count() > MAX_PATH_CHARS {
        return None;
    }
    Some(path.to_string())
}

fn clean_referrer(raw: Option<String>) -> Option<String> {
    super::clean_optional(raw).map(|referrer| referrer.chars().take(MAX_REFERRER_CHARS).collect())
}

async fn track(
    State(state): State<AppState>,
    Json(view): Json<PageView>,
) -> Result<StatusCode, HandlerError> {
    let path = clean_path(&view.path).ok_or_else(|| bad_request("Path must start with '/'."))?;

    sqlx::query("INSERT INTO page_views (path, referrer) VALUES ($1, $2)")
        .bind(path)
        .bind(clean_referrer(view.referrer))
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to record page view"))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn count(pool: &PgPool, sql: &str, since: Option<DateTime<Utc>>) -> Result<i64, HandlerError> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    if let Some(since) = since {
        query = query.bind(since);
    }
    query
        .fetch_one(pool)
        .await
        .map_err(|err| internal_error(err, "failed to compute analytics count"))
}

async fn summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<AnalyticsSummary> {
    let pool = state.pool();
    let window_days = window_days(query.days);
    let since = Utc::now() - Duration::days(window_days);

    let members_by_status = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM members GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await
    .map_err(|err| internal_error(err, "failed to count members"))?;

    let upcoming_sql = format!("SELECT COUNT(*) FROM events e WHERE {UPCOMING_PREDICATE}");
    let past_sql = format!("SELECT COUNT(*) FROM events e WHERE NOT ({UPCOMING_PREDICATE})");
    let upcoming_events = count(pool, &upcoming_sql, None).await?;
    let past_events = count(pool, &past_sql, None).await?;

    let top_events = sqlx::query_as::<_, EventPopularity>(
        "SELECT e.id, e.slug, e.title, COUNT(r.id) AS registrations
         FROM events e
         JOIN registrations r ON r.event_id = e.id AND r.status IN ('pending', 'approved')
         WHERE r.created_at >= $1
         GROUP BY e.id
         ORDER BY registrations DESC, e.starts_at DESC
         LIMIT 5",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .map_err(|err| internal_error(err, "failed to rank events"))?;

    let forum_topics = count(
        pool,
        "SELECT COUNT(*) FROM forum_topics WHERE created_at >= $1",
        Some(since),
    )
    .await?;
    let forum_replies = count(
        pool,
        "SELECT COUNT(*) FROM forum_replies WHERE created_at >= $1",
        Some(since),
    )
    .await?;
    let comments = count(
        pool,
        "SELECT COUNT(*) FROM comments WHERE created_at >= $1 AND NOT is_deleted",
        Some(since),
    )
    .await?;
    let page_views = count(
        pool,
        "SELECT COUNT(*) FROM page_views WHERE occurred_at >= $1",
        Some(since),
    )
    .await?;

    let top_paths = sqlx::query_as::<_, PathViews>(
        "SELECT path, COUNT(*) AS views FROM page_views
         WHERE occurred_at >= $1
         GROUP BY path
         ORDER BY views DESC, path
         LIMIT 10",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .map_err(|err| internal_error(err, "failed to rank paths"))?;

    let views_per_day = sqlx::query_as::<_, DailyViews>(
        "SELECT (occurred_at AT TIME ZONE 'UTC')::DATE AS day, COUNT(*) AS views
         FROM page_views
         WHERE occurred_at >= $1
         GROUP BY day
         ORDER BY day",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .map_err(|err| internal_error(err, "failed to bucket page views"))?;

    Ok(Json(AnalyticsSummary {
        window_days,
        since,
        members_by_status,
        upcoming_events,
        past_events,
        top_events,
        forum_topics,
        forum_replies,
        comments,
        page_views,
        top_paths,
        views_per_day,
    }))
}
