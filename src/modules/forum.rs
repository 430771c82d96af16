use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState,
    auth::approved_member,
    models::{is_valid_slug, slugify},
    responses::{
        ApiResult, Deleted, HandlerError, bad_request, conflict, internal_error,
        is_foreign_key_violation, not_found, write_error,
    },
};

use super::{
    access::{Section, require_section},
    clean_optional,
};

pub const TOPICS_PER_PAGE: i64 = 20;
const MAX_PAGE: i64 = 1000;
const MAX_TITLE_CHARS: usize = 200;
const MAX_BODY_CHARS: usize = 10_000;

const TOPIC_COLUMNS: &str = "t.id, t.category_id, t.member_id, m.full_name AS author_name, t.title, t.body,
     t.pinned, t.locked, t.last_activity_at, t.created_at,
     (SELECT COUNT(*) FROM forum_replies r WHERE r.topic_id = t.id) AS reply_count,
     COALESCE((SELECT SUM(v.value) FROM forum_votes v
               WHERE v.target_type = 'topic' AND v.target_id = t.id), 0)::BIGINT AS score";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteTarget {
    Topic,
    Reply,
}

impl VoteTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteTarget::Topic => "topic",
            VoteTarget::Reply => "reply",
        }
    }

    fn existence_query(self) -> &'static str {
        match self {
            VoteTarget::Topic => "SELECT EXISTS(SELECT 1 FROM forum_topics WHERE id = $1)",
            VoteTarget::Reply => "SELECT EXISTS(SELECT 1 FROM forum_replies WHERE id = $1)",
        }
    }
}

/// What a vote request does to the member's stored vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Cast(i16),
    Retract,
    Switch(i16),
}

impl VoteChange {
    pub fn resulting_vote(self) -> Option<i16> {
        match self {
            VoteChange::Cast(value) | VoteChange::Switch(value) => Some(value),
            VoteChange::Retract => None,
        }
    }
}

/// Repeating a vote retracts it; the opposite value flips it.
pub fn vote_outcome(existing: Option<i16>, requested: i16) -> VoteChange {
    match existing {
        None => VoteChange::Cast(requested),
        Some(current) if current == requested => VoteChange::Retract,
        Some(_) => VoteChange::Switch(requested),
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i32,
    pub topic_count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TopicRow {
    pub id: Uuid,
    pub category_id: Uuid,
    pub member_id: Uuid,
    pub author_name: String,
    pub title: String,
    pub body: String,
    pub pinned: bool,
    pub locked: bool,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub reply_count: i64,
    pub score: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReplyRow {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub member_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub score: i64,
}

#[derive(Debug, Serialize)]
pub struct TopicPage {
    pub category: CategoryRow,
    pub page: i64,
    pub per_page: i64,
    pub topics: Vec<TopicRow>,
}

#[derive(Debug, Serialize)]
pub struct TopicDetail {
    pub topic: TopicRow,
    pub replies: Vec<ReplyRow>,
}

#[derive(Debug, Serialize)]
pub struct VoteResult {
    pub target_type: VoteTarget,
    pub target_id: Uuid,
    pub score: i64,
    pub my_vote: Option<i16>,
}

#[derive(Default, Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    page: Option<i64>,
}

#[derive(Deserialize)]
pub(crate) struct NewTopic {
    category_id: Uuid,
    title: String,
    body: String,
}

#[derive(Deserialize)]
pub(crate) struct NewReply {
    body: String,
}

#[derive(Deserialize)]
pub(crate) struct VoteRequest {
    target_type: VoteTarget,
    target_id: Uuid,
    value: i16,
}

#[derive(Deserialize)]
pub(crate) struct ModerationRequest {
    #[serde(default)]
    pinned: Option<bool>,
    #[serde(default)]
    locked: Option<bool>,
}

#[derive(Deserialize)]
pub(crate) struct NewCategory {
    #[serde(default)]
    slug: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display_order: i32,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/forum/categories", get(list_categories))
        .route("/api/forum/categories/:slug/topics", get(list_topics))
        .route("/api/forum/topics", post(create_topic))
        .route("/api/forum/topics/:id", get(get_topic))
        .route("/api/forum/topics/:id/replies", post(create_reply))
        .route("/api/forum/topics/:id/moderate", patch(moderate_topic))
        .route("/api/forum/votes", post(cast_vote))
        .route("/api/admin/forum/categories", post(create_category))
        .route("/api/admin/forum/topics/:id", delete(delete_topic))
        .route("/api/admin/forum/replies/:id", delete(delete_reply))
}

/// Clamped 1-based page number and its row offset.
pub fn page_offset(page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    (page, (page - 1) * TOPICS_PER_PAGE)
}

pub(crate) fn clean_text(value: &str, field: &str, max_chars: usize) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("{field} is required."));
    }
    if value.chars().count() > max_chars {
        return Err(format!("{field} must be at most {max_chars} characters."));
    }
    Ok(value.to_string())
}

async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<CategoryRow>> {
    sqlx::query_as::<_, CategoryRow>(
        "SELECT c.id, c.slug, c.name, c.description, c.display_order,
                (SELECT COUNT(*) FROM forum_topics t WHERE t.category_id = c.id) AS topic_count
         FROM forum_categories c
         ORDER BY c.display_order, c.name",
    )
    .fetch_all(state.pool())
    .await
    .map(Json)
    .map_err(|err| internal_error(err, "failed to list forum categories"))
}

async fn list_topics(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<TopicPage> {
    let category = sqlx::query_as::<_, CategoryRow>(
        "SELECT c.id, c.slug, c.name, c.description, c.display_order,
                (SELECT COUNT(*) FROM forum_topics t WHERE t.category_id = c.id) AS topic_count
         FROM forum_categories c
         WHERE c.slug = $1",
    )
    .bind(&slug)
    .fetch_optional(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to load forum category"))?
    .ok_or_else(|| not_found("Category"))?;

    let (page, offset) = page_offset(query.page);
    let sql = format!(
        "SELECT {TOPIC_COLUMNS}
         FROM forum_topics t
         JOIN members m ON m.id = t.member_id
         WHERE t.category_id = $1
         ORDER BY t.pinned DESC, t.last_activity_at DESC
         LIMIT $2 OFFSET $3"
    );
    let topics = sqlx::query_as::<_, TopicRow>(&sql)
        .bind(category.id)
        .bind(TOPICS_PER_PAGE)
        .bind(offset)
        .fetch_all(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to list forum topics"))?;

    Ok(Json(TopicPage {
        category,
        page,
        per_page: TOPICS_PER_PAGE,
        topics,
    }))
}

async fn fetch_topic(state: &AppState, id: Uuid) -> Result<TopicRow, HandlerError> {
    let sql = format!(
        "SELECT {TOPIC_COLUMNS}
         FROM forum_topics t
         JOIN members m ON m.id = t.member_id
         WHERE t.id = $1"
    );
    sqlx::query_as::<_, TopicRow>(&sql)
        .bind(id)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to load forum topic"))?
        .ok_or_else(|| not_found("Topic"))
}

async fn get_topic(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<TopicDetail> {
    let topic = fetch_topic(&state, id).await?;

    let replies = sqlx::query_as::<_, ReplyRow>(
        "SELECT r.id, r.topic_id, r.member_id, m.full_name AS author_name, r.body, r.created_at,
                COALESCE((SELECT SUM(v.value) FROM forum_votes v
                          WHERE v.target_type = 'reply' AND v.target_id = r.id), 0)::BIGINT AS score
         FROM forum_replies r
         JOIN members m ON m.id = r.member_id
         WHERE r.topic_id = $1
         ORDER BY r.created_at ASC",
    )
    .bind(id)
    .fetch_all(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to list forum replies"))?;

    Ok(Json(TopicDetail { topic, replies }))
}

async fn create_topic(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<NewTopic>,
) -> Result<(StatusCode, Json<TopicRow>), HandlerError> {
    let member = approved_member(&state, &jar).await?;
    let title = clean_text(&input.title, "Title", MAX_TITLE_CHARS).map_err(bad_request)?;
    let body = clean_text(&input.body, "Body", MAX_BODY_CHARS).map_err(bad_request)?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO forum_topics (id, category_id, member_id, title, body) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(input.category_id)
    .bind(member.id)
    .bind(&title)
    .bind(&body)
    .execute(state.pool())
    .await
    .map_err(|err| {
        if is_foreign_key_violation(&err) {
            not_found("Category")
        } else {
            internal_error(err, "failed to create forum topic")
        }
    })?;

    info!(topic_id = %id, member_id = %member.id, "forum topic created");
    let topic = fetch_topic(&state, id).await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

async fn create_reply(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(topic_id): Path<Uuid>,
    Json(input): Json<NewReply>,
) -> Result<(StatusCode, Json<ReplyRow>), HandlerError> {
    let member = approved_member(&state, &jar).await?;
    let body = clean_text(&input.body, "Reply", MAX_BODY_CHARS).map_err(bad_request)?;

    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|err| internal_error(err, "failed to open reply transaction"))?;

    let locked: bool = sqlx::query_scalar("SELECT locked FROM forum_topics WHERE id = $1 FOR UPDATE")
        .bind(topic_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| internal_error(err, "failed to load forum topic"))?
        .ok_or_else(|| not_found("Topic"))?;
    if locked {
        return Err(conflict("This topic is locked."));
    }

    let id = Uuid::new_v4();
    let created_at: DateTime<Utc> = sqlx::query_scalar(
        "INSERT INTO forum_replies (id, topic_id, member_id, body) VALUES ($1, $2, $3, $4)
         RETURNING created_at",
    )
    .bind(id)
    .bind(topic_id)
    .bind(member.id)
    .bind(&body)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| internal_error(err, "failed to create forum reply"))?;

    sqlx::query("UPDATE forum_topics SET last_activity_at = $2 WHERE id = $1")
        .bind(topic_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| internal_error(err, "failed to bump topic activity"))?;

    tx.commit()
        .await
        .map_err(|err| internal_error(err, "failed to commit forum reply"))?;

    Ok((
        StatusCode::CREATED,
        Json(ReplyRow {
            id,
            topic_id,
            member_id: member.id,
            author_name: member.full_name,
            body,
            created_at,
            score: 0,
        }),
    ))
}

async fn target_score(
    tx: &mut Transaction<'_, Postgres>,
    target: VoteTarget,
    target_id: Uuid,
) -> Result<i64, HandlerError> {
    sqlx::query_scalar(
        "SELECT COALESCE(SUM(value), 0)::BIGINT FROM forum_votes WHERE target_type = $1 AND target_id = $2",
    )
    .bind(target.as_str())
    .bind(target_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| internal_error(err, "failed to compute vote score"))
}

async fn cast_vote(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<VoteRequest>,
) -> ApiResult<VoteResult> {
    let member = approved_member(&state, &jar).await?;
    if request.value != 1 && request.value != -1 {
        return Err(bad_request("Vote value must be 1 or -1."));
    }

    let exists: bool = sqlx::query_scalar(request.target_type.existence_query())
        .bind(request.target_id)
        .fetch_one(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to check vote target"))?;
    if !exists {
        return Err(not_found("Vote target"));
    }

    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|err| internal_error(err, "failed to open vote transaction"))?;

    let existing: Option<i16> = sqlx::query_scalar(
        "SELECT value FROM forum_votes
         WHERE member_id = $1 AND target_type = $2 AND target_id = $3
         FOR UPDATE",
    )
    .bind(member.id)
    .bind(request.target_type.as_str())
    .bind(request.target_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| internal_error(err, "failed to load existing vote"))?;

    let change = vote_outcome(existing, request.value);
    let statement = match change {
        VoteChange::Cast(_) => {
            "INSERT INTO forum_votes (member_id, target_type, target_id, value) VALUES ($1, $2, $3, $4)"
        }
        VoteChange::Switch(_) => {
            "UPDATE forum_votes SET value = $4 WHERE member_id = $1 AND target_type = $2 AND target_id = $3"
        }
        VoteChange::Retract => {
            "DELETE FROM forum_votes WHERE member_id = $1 AND target_type = $2 AND target_id = $3 AND value = $4"
        }
    };
    sqlx::query(statement)
        .bind(member.id)
        .bind(request.target_type.as_str())
        .bind(request.target_id)
        .bind(request.value)
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error(err, "Vote already recorded, try again.", "failed to record vote"))?;

    let score = target_score(&mut tx, request.target_type, request.target_id).await?;
    tx.commit()
        .await
        .map_err(|err| internal_error(err, "failed to commit vote"))?;

    Ok(Json(VoteResult {
        target_type: request.target_type,
        target_id: request.target_id,
        score,
        my_vote: change.resulting_vote(),
    }))
}

async fn moderate_topic(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
    Json(request): Json<ModerationRequest>,
) -> ApiResult<TopicRow> {
    let member = approved_member(&state, &jar).await?;
    require_section(&state, &member, Section::Forum).await?;

    if request.pinned.is_none() && request.locked.is_none() {
        return Err(bad_request("Nothing to change."));
    }

    let result = sqlx::query(
        "UPDATE forum_topics SET pinned = COALESCE($2, pinned), locked = COALESCE($3, locked) WHERE id = $1",
    )
    .bind(id)
    .bind(request.pinned)
    .bind(request.locked)
    .execute(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to moderate forum topic"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Topic"));
    }

    info!(topic_id = %id, moderator = %member.id, pinned = ?request.pinned, locked = ?request.locked, "forum topic moderated");
    fetch_topic(&state, id).await.map(Json)
}

async fn create_category(
    State(state): State<AppState>,
    Json(input): Json<NewCategory>,
) -> Result<(StatusCode, Json<CategoryRow>), HandlerError> {
    let name = clean_text(&input.name, "Name", MAX_TITLE_CHARS).map_err(bad_request)?;
    let slug = match clean_optional(input.slug) {
        Some(slug) if is_valid_slug(&slug) => slug,
        Some(_) => {
            return Err(bad_request(
                "Slug may only contain lowercase letters, digits and single dashes.",
            ));
        }
        None => slugify(&name).ok_or_else(|| bad_request("Could not derive a slug from the name."))?,
    };

    let row = sqlx::query_as::<_, CategoryRow>(
        "INSERT INTO forum_categories (id, slug, name, description, display_order)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, slug, name, description, display_order, 0::BIGINT AS topic_count",
    )
    .bind(Uuid::new_v4())
    .bind(&slug)
    .bind(&name)
    .bind(clean_optional(input.description))
    .bind(input.display_order)
    .fetch_one(state.pool())
    .await
    .map_err(|err| {
        write_error(
            err,
            "A category with this slug already exists.",
            "failed to create forum category",
        )
    })?;

    info!(category = %row.slug, "forum category created");
    Ok((StatusCode::CREATED, Json(row)))
}

async fn delete_votes_for(
    tx: &mut Transaction<'_, Postgres>,
    target: VoteTarget,
    ids: &[Uuid],
) -> Result<(), HandlerError> {
    sqlx::query("DELETE FROM forum_votes WHERE target_type = $1 AND target_id = ANY($2)")
        .bind(target.as_str())
        .bind(ids)
        .execute(&mut **tx)
        .await
        .map_err(|err| internal_error(err, "failed to delete forum votes"))?;
    Ok(())
}

async fn delete_topic(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|err| internal_error(err, "failed to open forum delete transaction"))?;

    let reply_ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM forum_replies WHERE topic_id = $1")
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| internal_error(err, "failed to list topic replies"))?;

    let result = sqlx::query("DELETE FROM forum_topics WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|err| internal_error(err, "failed to delete forum topic"))?;
    if result.rows_affected() == 0 {
        return Err(not_found("Topic"));
    }

    delete_votes_for(&mut tx, VoteTarget::Topic, &[id]).await?;
    delete_votes_for(&mut tx, VoteTarget::Reply, &reply_ids).await?;

    tx.commit()
        .await
        .map_err(|err| internal_error(err, "failed to commit forum delete"))?;

    info!(topic_id = %id, replies = reply_ids.len(), "forum topic deleted");
    Ok(Deleted::json())
}

async fn delete_reply(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|err| internal_error(err, "failed to open forum delete transaction"))?;

    let result = sqlx::query("DELETE FROM forum_replies WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|err| internal_error(err, "failed to delete forum reply"))?;
    if result.rows_affected() == 0 {
        return Err(not_found("Reply"));
    }

    delete_votes_for(&mut tx, VoteTarget::Reply, &[id]).await?;
    tx.commit()
        .await
        .map_err(|err| internal_error(err, "failed to commit forum delete"))?;

    Ok(Deleted::json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_vote_is_cast() {
        assert_eq!(vote_outcome(None, 1), VoteChange::Cast(1));
        assert_eq!(vote_outcome(None, -1), VoteChange::Cast(-1));
    }

    #[test]
    fn repeated_vote_toggles_off() {
        let change = vote_outcome(Some(1), 1);
        assert_eq!(change, VoteChange::Retract);
        assert_eq!(change.resulting_vote(), None);
    }

    #[test]
    fn opposite_vote_flips() {
        let change = vote_outcome(Some(1), -1);
        assert_eq!(change, VoteChange::Switch(-1));
        assert_eq!(change.resulting_vote(), Some(-1));
    }

    #[test]
    fn page_offset_is_one_based_and_bounded() {
        assert_eq!(page_offset(None), (1, 0));
        assert_eq!(page_offset(Some(0)), (1, 0));
        assert_eq!(page_offset(Some(3)), (3, 2 * TOPICS_PER_PAGE));
        assert_eq!(page_offset(Some(i64::MAX)).0, MAX_PAGE);
    }

    #[test]
    fn clean_text_enforces_limits() {
        assert_eq!(clean_text("  Hello ", "Title", 10).unwrap(), "Hello");
        assert!(clean_text("   ", "Title", 10).is_err());
        assert!(clean_text("abcdefghijk", "Title", 10).is_err());
    }
}
