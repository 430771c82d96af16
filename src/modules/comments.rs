use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState,
    auth::{approved_member, current_member},
    responses::{
        ApiResult, Deleted, HandlerError, bad_request, conflict, internal_error, json_error,
        not_found,
    },
};

use super::access::{Section, member_has_any_section};

/// Soft-deleted comments stay restorable for this long, then get purged.
pub const COMMENT_RETENTION_DAYS: i64 = 30;
const MAX_BODY_CHARS: usize = 2000;
const COMMENT_MODERATORS: &[Section] = &[Section::Comments];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentTarget {
    Announcement,
    Event,
    Project,
}

impl CommentTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentTarget::Announcement => "announcement",
            CommentTarget::Event => "event",
            CommentTarget::Project => "project",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            CommentTarget::Announcement,
            CommentTarget::Event,
            CommentTarget::Project,
        ]
        .into_iter()
        .find(|target| target.as_str() == value)
    }

    /// Access sections whose holders may remove other members' comments here.
    pub fn moderating_sections(self) -> &'static [Section] {
        match self {
            CommentTarget::Announcement => COMMENT_MODERATORS,
            CommentTarget::Event => &[Section::Comments, Section::Events],
            CommentTarget::Project => &[Section::Comments, Section::Projects],
        }
    }

    /// Commentable rows: published announcements and events, approved projects.
    fn existence_query(self) -> &'static str {
        match self {
            CommentTarget::Announcement => {
                "SELECT EXISTS(SELECT 1 FROM announcements WHERE id = $1 AND published)"
            }
            CommentTarget::Event => "SELECT EXISTS(SELECT 1 FROM events WHERE id = $1 AND published)",
            CommentTarget::Project => {
                "SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1 AND status = 'approved')"
            }
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CommentRow {
    pub id: Uuid,
    pub target_type: String,
    pub target_id: Uuid,
    pub member_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Comment as stored, including its soft-delete columns.
#[derive(Debug, sqlx::FromRow)]
pub struct StoredComment {
    pub id: Uuid,
    pub target_type: String,
    pub target_id: Uuid,
    pub member_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentState {
    Visible,
    /// Soft-deleted and still inside the grace period.
    Restorable,
    /// Soft-deleted and past the grace period; the next purge removes it.
    Expired,
}

impl CommentState {
    pub fn of(is_deleted: bool, deleted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        if !is_deleted {
            CommentState::Visible
        } else if can_restore(deleted_at, now) {
            CommentState::Restorable
        } else {
            CommentState::Expired
        }
    }

    pub fn is_listed(self) -> bool {
        self == CommentState::Visible
    }

    pub fn is_purgeable(self) -> bool {
        self == CommentState::Expired
    }
}

impl StoredComment {
    pub fn state(&self, now: DateTime<Utc>) -> CommentState {
        CommentState::of(self.is_deleted, self.deleted_at, now)
    }
}

/// Comments shown on a public listing, in the order given.
pub fn listed_comments(rows: Vec<StoredComment>, now: DateTime<Utc>) -> Vec<CommentRow> {
    rows.into_iter()
        .filter(|row| row.state(now).is_listed())
        .map(|row| CommentRow {
            id: row.id,
            target_type: row.target_type,
            target_id: row.target_id,
            member_id: row.member_id,
            author_name: row.author_name,
            body: row.body,
            created_at: row.created_at,
        })
        .collect()
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DeletedCommentRow {
    pub id: Uuid,
    pub target_type: String,
    pub target_id: Uuid,
    pub member_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct DeletedComment {
    #[serde(flatten)]
    pub comment: DeletedCommentRow,
    pub restorable: bool,
}

#[derive(Debug, Serialize)]
pub struct Restored {
    pub restored: bool,
}

#[derive(Deserialize)]
pub(crate) struct CommentQuery {
    target_type: CommentTarget,
    target_id: Uuid,
}

#[derive(Deserialize)]
pub(crate) struct NewComment {
    target_type: CommentTarget,
    target_id: Uuid,
    body: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/comments", get(list_comments).post(create_comment))
        .route("/api/comments/:id", delete(delete_comment))
        .route("/api/admin/comments/deleted", get(list_deleted))
        .route("/api/admin/comments/:id/restore", post(restore_comment))
}

/// Comments deleted before this instant are past their grace period.
pub fn purge_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(COMMENT_RETENTION_DAYS)
}

pub fn can_restore(deleted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    deleted_at.is_some_and(|at| at > purge_cutoff(now))
}

pub(crate) fn clean_body(body: &str) -> Result<String, String> {
    let body = body.trim();
    if body.is_empty() {
        return Err("Comment cannot be empty.".to_string());
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(format!("Comment must be at most {MAX_BODY_CHARS} characters."));
    }
    Ok(body.to_string())
}

/// Permanently removes comments whose grace period has run out.
pub async fn purge_expired(pool: &PgPool, now: DateTime<Utc>) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM comments WHERE is_deleted AND (deleted_at IS NULL OR deleted_at <= $1)",
    )
        .bind(purge_cutoff(now))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<CommentQuery>,
) -> ApiResult<Vec<CommentRow>> {
    let rows = sqlx::query_as::<_, StoredComment>(
        "SELECT c.id, c.target_type, c.target_id, c.member_id, m.full_name AS author_name, c.body,
                c.created_at, c.is_deleted, c.deleted_at
         FROM comments c
         JOIN members m ON m.id = c.member_id
         WHERE c.target_type = $1 AND c.target_id = $2 AND NOT c.is_deleted
         ORDER BY c.created_at ASC",
    )
    .bind(query.target_type.as_str())
    .bind(query.target_id)
    .fetch_all(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to list comments"))?;

    Ok(Json(listed_comments(rows, Utc::now())))
}

async fn create_comment(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<NewComment>,
) -> Result<(StatusCode, Json<CommentRow>), HandlerError> {
    let member = approved_member(&state, &jar).await?;
    let body = clean_body(&input.body).map_err(bad_request)?;

    let target_exists: bool = sqlx::query_scalar(input.target_type.existence_query())
        .bind(input.target_id)
        .fetch_one(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to check comment target"))?;
    if !target_exists {
        return Err(not_found("Comment target"));
    }

    let row = sqlx::query_as::<_, CommentRow>(
        "WITH inserted AS (
             INSERT INTO comments (id, target_type, target_id, member_id, body)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, target_type, target_id, member_id, body, created_at
         )
         SELECT i.id, i.target_type, i.target_id, i.member_id, m.full_name AS author_name, i.body, i.created_at
         FROM inserted i
         JOIN members m ON m.id = i.member_id",
    )
    .bind(Uuid::new_v4())
    .bind(input.target_type.as_str())
    .bind(input.target_id)
    .bind(member.id)
    .bind(&body)
    .fetch_one(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to create comment"))?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn delete_comment(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
) -> ApiResult<Deleted> {
    let member = current_member(&state, &jar).await?;

    let (author, target_type): (Uuid, String) = sqlx::query_as(
        "SELECT member_id, target_type FROM comments WHERE id = $1 AND NOT is_deleted",
    )
    .bind(id)
    .fetch_optional(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to load comment"))?
    .ok_or_else(|| not_found("Comment"))?;

    if author != member.id {
        let sections = CommentTarget::parse(&target_type)
            .map_or(COMMENT_MODERATORS, CommentTarget::moderating_sections);
        let moderator = member_has_any_section(state.pool(), member.id, sections)
            .await
            .map_err(|err| internal_error(err, "failed to check access rule"))?;
        if !moderator {
            return Err(json_error(
                StatusCode::FORBIDDEN,
                "You can only delete your own comments.",
            ));
        }
    }

    sqlx::query("UPDATE comments SET is_deleted = TRUE, deleted_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete comment"))?;

    info!(comment_id = %id, deleted_by = %member.id, "comment soft-deleted");
    Ok(Deleted::json())
}

async fn list_deleted(State(state): State<AppState>) -> ApiResult<Vec<DeletedComment>> {
    let rows = sqlx::query_as::<_, DeletedCommentRow>(
        "SELECT c.id, c.target_type, c.target_id, c.member_id, m.full_name AS author_name, c.body,
                c.created_at, c.deleted_at
         FROM comments c
         JOIN members m ON m.id = c.member_id
         WHERE c.is_deleted
         ORDER BY c.deleted_at DESC",
    )
    .fetch_all(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to list deleted comments"))?;

    let now = Utc::now();
    Ok(Json(
        rows.into_iter()
            .map(|comment| DeletedComment {
                restorable: CommentState::of(true, comment.deleted_at, now)
                    == CommentState::Restorable,
                comment,
            })
            .collect(),
    ))
}

async fn restore_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Restored> {
    let deleted_at: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT deleted_at FROM comments WHERE id = $1 AND is_deleted")
            .bind(id)
            .fetch_optional(state.pool())
            .await
            .map_err(|err| internal_error(err, "failed to load deleted comment"))?
            .ok_or_else(|| not_found("Deleted comment"))?;

    if CommentState::of(true, deleted_at, Utc::now()) != CommentState::Restorable {
        return Err(conflict("The restore window for this comment has closed."));
    }

    sqlx::query("UPDATE comments SET is_deleted = FALSE, deleted_at = NULL WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to restore comment"))?;

    info!(comment_id = %id, "comment restored");
    Ok(Json(Restored { restored: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_window_lasts_thirty_days() {
        let now = Utc::now();
        assert!(can_restore(Some(now - Duration::days(29)), now));
        assert!(can_restore(Some(now - Duration::hours(1)), now));
        assert!(!can_restore(Some(now - Duration::days(31)), now));
        assert!(!can_restore(None, now));
    }

    #[test]
    fn purge_cutoff_matches_retention() {
        let now = Utc::now();
        assert_eq!(now - purge_cutoff(now), Duration::days(COMMENT_RETENTION_DAYS));
    }

    #[test]
    fn clean_body_trims_and_bounds() {
        assert_eq!(clean_body("  nice talk  ").unwrap(), "nice talk");
        assert!(clean_body(" \n ").is_err());
        assert!(clean_body(&"a".repeat(MAX_BODY_CHARS + 1)).is_err());
    }

    #[test]
    fn comment_targets_use_lowercase_names() {
        let target: CommentTarget = serde_json::from_str(r#""project""#).unwrap();
        assert_eq!(target, CommentTarget::Project);
        assert_eq!(CommentTarget::Announcement.as_str(), "announcement");
        assert!(serde_json::from_str::<CommentTarget>(r#""forum""#).is_err());
    }

    fn stored(body: &str, is_deleted: bool, deleted_at: Option<DateTime<Utc>>) -> StoredComment {
        StoredComment {
            id: Uuid::new_v4(),
            target_type: "event".into(),
            target_id: Uuid::nil(),
            member_id: Uuid::new_v4(),
            author_name: "Ada".into(),
            body: body.into(),
            created_at: Utc::now() - Duration::days(60),
            is_deleted,
            deleted_at,
        }
    }

    #[test]
    fn soft_deleted_comment_lifecycle() {
        let deleted_at = Utc::now();
        let kept = stored("still here", false, None);
        let removed = stored("regret", true, Some(deleted_at));

        let before = CommentState::of(false, None, deleted_at);
        assert!(before.is_listed());

        // Hidden from the listing as soon as it is deleted, but restorable.
        let just_after = deleted_at + Duration::minutes(1);
        assert_eq!(removed.state(just_after), CommentState::Restorable);
        assert!(!removed.state(just_after).is_purgeable());
        let listed = listed_comments(
            vec![stored("still here", false, None), stored("regret", true, Some(deleted_at))],
            just_after,
        );
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].body, kept.body);

        let late_in_grace = deleted_at + Duration::days(COMMENT_RETENTION_DAYS) - Duration::minutes(1);
        assert_eq!(removed.state(late_in_grace), CommentState::Restorable);

        let past_grace = deleted_at + Duration::days(COMMENT_RETENTION_DAYS);
        assert_eq!(removed.state(past_grace), CommentState::Expired);
        assert!(removed.state(past_grace).is_purgeable());
        assert!(!removed.state(past_grace).is_listed());
        assert!(deleted_at <= purge_cutoff(past_grace));
    }

    #[test]
    fn deleted_without_timestamp_is_not_restorable() {
        assert_eq!(CommentState::of(true, None, Utc::now()), CommentState::Expired);
    }

    #[test]
    fn moderation_sections_follow_the_target() {
        assert_eq!(
            CommentTarget::Announcement.moderating_sections(),
            [Section::Comments]
        );
        assert!(CommentTarget::Event.moderating_sections().contains(&Section::Events));
        assert!(!CommentTarget::Event.moderating_sections().contains(&Section::Projects));
        assert!(CommentTarget::Project.moderating_sections().contains(&Section::Projects));
        assert_eq!(CommentTarget::parse("project"), Some(CommentTarget::Project));
        assert_eq!(CommentTarget::parse("forum"), None);
    }
}
