use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState, LocalizedText, ReviewStatus,
    auth::{approved_member, current_member},
    models::is_http_url,
    responses::{ApiResult, HandlerError, bad_request, internal_error, not_found},
};

use super::{StatusUpdate, check_transition, clean_optional, require_localized};

const MAX_TITLE_LEN: usize = 160;
const PROJECT_COLUMNS: &str = "p.id, p.member_id, m.full_name AS author_name, p.title, p.description,
     p.repo_url, p.status, p.created_at, p.updated_at";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub member_id: Uuid,
    pub author_name: String,
    pub title: String,
    pub description: SqlJson<LocalizedText>,
    pub repo_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub(crate) struct ProjectInput {
    title: String,
    description: LocalizedText,
    #[serde(default)]
    repo_url: Option<String>,
}

#[derive(Default, Deserialize)]
pub(crate) struct ProjectQuery {
    #[serde(default)]
    status: Option<ReviewStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/projects", get(list_approved).post(submit_project))
        .route("/api/projects/mine", get(list_mine))
        .route("/api/admin/projects", get(list_for_review))
        .route("/api/admin/projects/:id/status", patch(update_status))
}

/// Checks submitted fields, returning the cleaned title and repository link.
pub(crate) fn validate_submission(
    title: &str,
    repo_url: Option<String>,
) -> Result<(String, Option<String>), String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("Title is required.".to_string());
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(format!("Title must be at most {MAX_TITLE_LEN} characters."));
    }

    let repo_url = clean_optional(repo_url);
    if repo_url.as_deref().is_some_and(|url| !is_http_url(url)) {
        return Err("Repository link must be an http(s) URL.".to_string());
    }

    Ok((title.to_string(), repo_url))
}

async fn list_approved(State(state): State<AppState>) -> ApiResult<Vec<ProjectRow>> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p JOIN members m ON m.id = p.member_id
         WHERE p.status = $1
         ORDER BY p.updated_at DESC"
    );
    sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(ReviewStatus::Approved.as_str())
        .fetch_all(state.pool())
        .await
        .map(Json)
        .map_err(|err| internal_error(err, "failed to list projects"))
}

async fn list_mine(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Vec<ProjectRow>> {
    let member = current_member(&state, &jar).await?;
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p JOIN members m ON m.id = p.member_id
         WHERE p.member_id = $1
         ORDER BY p.created_at DESC"
    );
    sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(member.id)
        .fetch_all(state.pool())
        .await
        .map(Json)
        .map_err(|err| internal_error(err, "failed to list member projects"))
}

async fn submit_project(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<ProjectInput>,
) -> Result<(StatusCode, Json<ProjectRow>), HandlerError> {
    let member = approved_member(&state, &jar).await?;
    let (title, repo_url) = validate_submission(&input.title, input.repo_url).map_err(bad_request)?;
    let description = require_localized(input.description, "Description")?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO projects (id, member_id, title, description, repo_url, status)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(member.id)
    .bind(&title)
    .bind(SqlJson(&description))
    .bind(&repo_url)
    .bind(ReviewStatus::Pending.as_str())
    .execute(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to submit project"))?;

    info!(project_id = %id, member_id = %member.id, "project submitted for review");

    let row = fetch_project(&state, id).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn fetch_project(state: &AppState, id: Uuid) -> Result<ProjectRow, HandlerError> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p JOIN members m ON m.id = p.member_id
         WHERE p.id = $1"
    );
    sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(id)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to load project"))?
        .ok_or_else(|| not_found("Project"))
}

async fn list_for_review(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Vec<ProjectRow>> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p JOIN members m ON m.id = p.member_id
         WHERE ($1::TEXT IS NULL OR p.status = $1)
         ORDER BY p.created_at DESC"
    );
    sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(query.status.map(ReviewStatus::as_str))
        .fetch_all(state.pool())
        .await
        .map(Json)
        .map_err(|err| internal_error(err, "failed to list projects for review"))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdate>,
) -> ApiResult<ProjectRow> {
    let project = fetch_project(&state, id).await?;
    if !check_transition(&project.status, payload.status)? {
        return Ok(Json(project));
    }

    sqlx::query("UPDATE projects SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(payload.status.as_str())
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to update project status"))?;

    info!(project_id = %id, from = %project.status, to = %payload.status, "project status changed");
    fetch_project(&state, id).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_trims_and_accepts_links() {
        let (title, url) =
            validate_submission("  Line follower ", Some(" https://github.com/club/robot ".into()))
                .unwrap();
        assert_eq!(title, "Line follower");
        assert_eq!(url.as_deref(), Some("https://github.com/club/robot"));

        let (_, url) = validate_submission("Robot", Some("   ".into())).unwrap();
        assert_eq!(url, None);
    }

    #[test]
    fn submission_rejects_bad_input() {
        assert!(validate_submission("   ", None).is_err());
        assert!(validate_submission(&"x".repeat(MAX_TITLE_LEN + 1), None).is_err());
        assert!(validate_submission("Robot", Some("ftp://example.com".into())).is_err());
    }
}
