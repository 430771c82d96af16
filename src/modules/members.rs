use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, patch},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState, ReviewStatus, SessionMember,
    auth::fetch_member,
    responses::{ApiResult, Deleted, internal_error, not_found},
};

use super::{StatusUpdate, check_transition};

#[derive(Default, Deserialize)]
pub(crate) struct MemberQuery {
    #[serde(default)]
    status: Option<ReviewStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/members", get(list_members))
        .route("/api/admin/members/:id", delete(delete_member))
        .route("/api/admin/members/:id/status", patch(update_status))
}

async fn list_members(
    State(state): State<AppState>,
    Query(query): Query<MemberQuery>,
) -> ApiResult<Vec<SessionMember>> {
    sqlx::query_as::<_, SessionMember>(
        "SELECT id, full_name, email, student_number, department, status, created_at
         FROM members
         WHERE ($1::TEXT IS NULL OR status = $1)
         ORDER BY created_at DESC",
    )
    .bind(query.status.map(ReviewStatus::as_str))
    .fetch_all(state.pool())
    .await
    .map(Json)
    .map_err(|err| internal_error(err, "failed to list members"))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdate>,
) -> ApiResult<SessionMember> {
    let member = fetch_member(state.pool(), id)
        .await
        .map_err(|err| internal_error(err, "failed to load member"))?
        .ok_or_else(|| not_found("Member"))?;

    if !check_transition(&member.status, payload.status)? {
        return Ok(Json(member));
    }

    let updated = sqlx::query_as::<_, SessionMember>(
        "UPDATE members SET status = $2, updated_at = NOW() WHERE id = $1
         RETURNING id, full_name, email, student_number, department, status, created_at",
    )
    .bind(id)
    .bind(payload.status.as_str())
    .fetch_one(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to update member status"))?;

    info!(member_id = %id, from = %member.status, to = %payload.status, "member status changed");
    Ok(Json(updated))
}

async fn delete_member(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let result = sqlx::query("DELETE FROM members WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete member"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Member"));
    }

    info!(member_id = %id, "member deleted");
    Ok(Deleted::json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn status_filter_is_optional_and_typed() {
        let query: MemberQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.status, None);
        let query: MemberQuery = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(query.status, Some(ReviewStatus::Pending));
        assert!(serde_json::from_str::<MemberQuery>(r#"{"status":"banned"}"#).is_err());
    }

    #[test]
    fn membership_review_transitions() {
        assert_eq!(check_transition("pending", ReviewStatus::Approved).ok(), Some(true));
        assert_eq!(check_transition("approved", ReviewStatus::Approved).ok(), Some(false));
        let (status, _) = check_transition("cancelled", ReviewStatus::Approved).unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
