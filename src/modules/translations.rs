use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    translate::{BatchRunner, BatchSummary, Pacing},
    web::{
        AppState, LocalizedText,
        responses::{ApiResult, bad_request, internal_error, json_error},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Announcements,
    Events,
    Projects,
    Sponsors,
}

impl Resource {
    fn table(self) -> &'static str {
        match self {
            Resource::Announcements => "announcements",
            Resource::Events => "events",
            Resource::Projects => "projects",
            Resource::Sponsors => "sponsors",
        }
    }

    /// Localized JSONB columns, in the order they are loaded and written back.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Resource::Announcements => &["title", "body"],
            Resource::Events => &["title", "description"],
            Resource::Projects | Resource::Sponsors => &["description"],
        }
    }

    fn select_sql(self) -> String {
        format!(
            "SELECT id, jsonb_build_array({}) AS fields FROM {} ORDER BY created_at",
            self.fields().join(", "),
            self.table()
        )
    }

    fn update_sql(self) -> String {
        let assignments: Vec<String> = self
            .fields()
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ($2::JSONB) -> {index}"))
            .collect();
        format!(
            "UPDATE {} SET {}, updated_at = NOW() WHERE id = $1",
            self.table(),
            assignments.join(", ")
        )
    }
}

#[derive(sqlx::FromRow)]
struct LocalizedRow {
    id: Uuid,
    fields: SqlJson<Vec<LocalizedText>>,
}

#[derive(Deserialize)]
pub(crate) struct TranslateRequest {
    resource: Resource,
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Serialize)]
pub struct TranslationReport {
    pub resource: Resource,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(flatten)]
    pub summary: BatchSummary,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/translate", post(translate_resource))
}

/// `en`, `tr`, `pt-br` style codes.
pub fn is_language_code(code: &str) -> bool {
    let mut parts = code.split('-');
    let base_ok = parts
        .next()
        .is_some_and(|base| (2..=3).contains(&base.len()) && base.chars().all(|c| c.is_ascii_alphabetic()));
    let region_ok = match parts.next() {
        None => true,
        Some(region) => region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()),
    };
    base_ok && region_ok && parts.next().is_none()
}

async fn translate_resource(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> ApiResult<TranslationReport> {
    let source_lang = request.source_lang.trim().to_ascii_lowercase();
    let target_lang = request.target_lang.trim().to_ascii_lowercase();
    if !is_language_code(&source_lang) || !is_language_code(&target_lang) {
        return Err(bad_request("Language codes look like \"en\" or \"pt-br\"."));
    }
    if source_lang == target_lang {
        return Err(bad_request("Source and target language must differ."));
    }

    let Some(translator) = state.translator() else {
        return Err(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Translation is not configured on this server.",
        ));
    };

    let rows = sqlx::query_as::<_, LocalizedRow>(&request.resource.select_sql())
        .fetch_all(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to load documents for translation"))?;

    let update_sql = request.resource.update_sql();
    let mut runner = BatchRunner::new(translator, Pacing::default(), &source_lang, &target_lang);

    for row in rows {
        let SqlJson(mut fields) = row.fields;
        let mut refs: Vec<&mut LocalizedText> = fields.iter_mut().collect();
        if !runner.translate_document(&mut refs).await {
            continue;
        }

        // A failed write only loses this document; the batch keeps going.
        if let Err(err) = sqlx::query(&update_sql)
            .bind(row.id)
            .bind(SqlJson(&fields))
            .execute(state.pool())
            .await
        {
            warn!(?err, id = %row.id, "failed to store translated document");
        }
    }

    let summary = runner.summary();
    info!(
        resource = ?request.resource,
        %source_lang,
        %target_lang,
        documents = summary.documents,
        translated = summary.translated,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch translation finished"
    );

    Ok(Json(TranslationReport {
        resource: request.resource,
        source_lang,
        target_lang,
        summary,
    }))
}
