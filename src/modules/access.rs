use std::{collections::BTreeSet, fmt};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState, SessionMember,
    responses::{
        ApiResult, Deleted, HandlerError, bad_request, internal_error, is_foreign_key_violation,
        json_error, not_found,
    },
};

/// Areas a non-admin member can be allowed to moderate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Comments,
    Forum,
    Events,
    Projects,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Comments,
        Section::Forum,
        Section::Events,
        Section::Projects,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Comments => "comments",
            Section::Forum => "forum",
            Section::Events => "events",
            Section::Projects => "projects",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|section| section.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AccessRuleRow {
    pub id: Uuid,
    pub member_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub sections: Vec<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub(crate) struct AccessRuleRequest {
    member_id: Uuid,
    sections: Vec<String>,
    #[serde(default)]
    note: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/access", get(list_rules).put(upsert_rule))
        .route("/api/admin/access/:id", delete(delete_rule))
}

/// Validates section names, returning them deduplicated in canonical order.
pub fn normalize_sections(input: &[String]) -> Result<Vec<String>, String> {
    let mut sections = BTreeSet::new();
    for raw in input {
        let section = Section::parse(raw).ok_or_else(|| format!("Unknown section {raw:?}."))?;
        sections.insert(section);
    }
    if sections.is_empty() {
        return Err("At least one section is required.".to_string());
    }
    Ok(sections
        .into_iter()
        .map(|section| section.as_str().to_string())
        .collect())
}

pub async fn member_has_section(
    pool: &PgPool,
    member_id: Uuid,
    section: Section,
) -> sqlx::Result<bool> {
    member_has_any_section(pool, member_id, &[section]).await
}

pub async fn member_has_any_section(
    pool: &PgPool,
    member_id: Uuid,
    sections: &[Section],
) -> sqlx::Result<bool> {
    let names: Vec<String> = sections
        .iter()
        .map(|section| section.as_str().to_string())
        .collect();
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM admin_access_rules WHERE member_id = $1 AND sections && $2)",
    )
    .bind(member_id)
    .bind(names)
    .fetch_one(pool)
    .await
}

/// 403 unless `member` holds `section`.
pub async fn require_section(
    state: &AppState,
    member: &SessionMember,
    section: Section,
) -> Result<(), HandlerError> {
    let allowed = member_has_section(state.pool(), member.id, section)
        .await
        .map_err(|err| internal_error(err, "failed to check access rule"))?;

    if allowed {
        Ok(())
    } else {
        Err(json_error(
            StatusCode::FORBIDDEN,
            format!("Moderator access to {section} is required."),
        ))
    }
}

async fn list_rules(State(state): State<AppState>) -> ApiResult<Vec<AccessRuleRow>> {
    sqlx::query_as::<_, AccessRuleRow>(
        "SELECT a.id, a.member_id, m.full_name, m.email, a.sections, a.note, a.created_at, a.updated_at
         FROM admin_access_rules a
         JOIN members m ON m.id = a.member_id
         ORDER BY m.full_name",
    )
    .fetch_all(state.pool())
    .await
    .map(Json)
    .map_err(|err| internal_error(err, "failed to list access rules"))
}

async fn upsert_rule(
    State(state): State<AppState>,
    Json(payload): Json<AccessRuleRequest>,
) -> ApiResult<AccessRuleRow> {
    let sections = normalize_sections(&payload.sections).map_err(bad_request)?;
    let note = super::clean_optional(payload.note);

    let rule_id: Uuid = sqlx::query_scalar(
        "INSERT INTO admin_access_rules (id, member_id, sections, note)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (member_id) DO UPDATE
         SET sections = EXCLUDED.sections, note = EXCLUDED.note, updated_at = NOW()
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(payload.member_id)
    .bind(&sections)
    .bind(note)
    .fetch_one(state.pool())
    .await
    .map_err(|err| {
        if is_foreign_key_violation(&err) {
            not_found("Member")
        } else {
            internal_error(err, "failed to upsert access rule")
        }
    })?;

    info!(member_id = %payload.member_id, ?sections, "access rule saved");

    sqlx::query_as::<_, AccessRuleRow>(
        "SELECT a.id, a.member_id, m.full_name, m.email, a.sections, a.note, a.created_at, a.updated_at
         FROM admin_access_rules a
         JOIN members m ON m.id = a.member_id
         WHERE a.id = $1",
    )
    .bind(rule_id)
    .fetch_one(state.pool())
    .await
    .map(Json)
    .map_err(|err| internal_error(err, "failed to reload access rule"))
}

async fn delete_rule(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let result = sqlx::query("DELETE FROM admin_access_rules WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete access rule"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Access rule"));
    }
    Ok(Deleted::json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_sections_dedupes_and_orders() {
        let input = vec!["Forum".to_string(), " comments ".to_string(), "forum".to_string()];
        assert_eq!(
            normalize_sections(&input).unwrap(),
            vec!["comments".to_string(), "forum".to_string()]
        );
    }

    #[test]
    fn normalize_sections_rejects_unknown_or_empty() {
        assert!(normalize_sections(&["finance".to_string()]).is_err());
        assert!(normalize_sections(&[]).is_err());
    }

    #[test]
    fn section_parse_is_case_insensitive() {
        assert_eq!(Section::parse("PROJECTS"), Some(Section::Projects));
        assert_eq!(Section::parse("admin"), None);
    }
}
