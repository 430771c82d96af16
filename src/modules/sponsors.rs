use std::{fmt, str::FromStr};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState, LocalizedText,
    models::is_http_url,
    responses::{ApiResult, Deleted, HandlerError, bad_request, internal_error, not_found},
};

use super::clean_optional;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SponsorTier {
    Platinum,
    Gold,
    Silver,
    Bronze,
    Partner,
}

impl SponsorTier {
    pub const ALL: [SponsorTier; 5] = [
        SponsorTier::Platinum,
        SponsorTier::Gold,
        SponsorTier::Silver,
        SponsorTier::Bronze,
        SponsorTier::Partner,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SponsorTier::Platinum => "platinum",
            SponsorTier::Gold => "gold",
            SponsorTier::Silver => "silver",
            SponsorTier::Bronze => "bronze",
            SponsorTier::Partner => "partner",
        }
    }

    /// Display rank; lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            SponsorTier::Platinum => 0,
            SponsorTier::Gold => 1,
            SponsorTier::Silver => 2,
            SponsorTier::Bronze => 3,
            SponsorTier::Partner => 4,
        }
    }
}

impl fmt::Display for SponsorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SponsorTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("Unknown sponsor tier {value:?}."))
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SponsorRow {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    pub logo_url: Option<String>,
    pub website_url: Option<String>,
    pub description: SqlJson<LocalizedText>,
    pub active: bool,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SponsorRow {
    /// Unknown tiers sort after every known one.
    fn sort_key(&self) -> (u8, i32) {
        let rank = self
            .tier
            .parse::<SponsorTier>()
            .map_or(u8::MAX, SponsorTier::rank);
        (rank, self.display_order)
    }
}

#[derive(Deserialize)]
pub(crate) struct SponsorInput {
    name: String,
    tier: SponsorTier,
    #[serde(default)]
    logo_url: Option<String>,
    #[serde(default)]
    website_url: Option<String>,
    #[serde(default)]
    description: LocalizedText,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    display_order: i32,
}

fn default_active() -> bool {
    true
}

const SPONSOR_COLUMNS: &str = "id, name, tier, logo_url, website_url, description, active, display_order, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sponsors", get(list_sponsors).post(create_sponsor))
        .route("/api/sponsors/:id", put(update_sponsor).delete(delete_sponsor))
}

pub(crate) fn sort_sponsors(rows: &mut [SponsorRow]) {
    rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.name.cmp(&b.name)));
}

struct ValidSponsor {
    name: String,
    tier: SponsorTier,
    logo_url: Option<String>,
    website_url: Option<String>,
    description: LocalizedText,
    active: bool,
    display_order: i32,
}

fn validate(input: SponsorInput) -> Result<ValidSponsor, HandlerError> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(bad_request("Sponsor name is required."));
    }

    let logo_url = clean_optional(input.logo_url);
    let website_url = clean_optional(input.website_url);
    for url in [&logo_url, &website_url].into_iter().flatten() {
        if !is_http_url(url) {
            return Err(bad_request(format!("{url:?} is not an http(s) URL.")));
        }
    }

    Ok(ValidSponsor {
        name,
        tier: input.tier,
        logo_url,
        website_url,
        description: input.description.normalized(),
        active: input.active,
        display_order: input.display_order,
    })
}

async fn list_sponsors(State(state): State<AppState>) -> ApiResult<Vec<SponsorRow>> {
    let sql = format!("SELECT {SPONSOR_COLUMNS} FROM sponsors WHERE active");
    let mut rows = sqlx::query_as::<_, SponsorRow>(&sql)
        .fetch_all(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to list sponsors"))?;

    sort_sponsors(&mut rows);
    Ok(Json(rows))
}

async fn create_sponsor(
    State(state): State<AppState>,
    Json(input): Json<SponsorInput>,
) -> Result<(StatusCode, Json<SponsorRow>), HandlerError> {
    let sponsor = validate(input)?;
    let sql = format!(
        "INSERT INTO sponsors (id, name, tier, logo_url, website_url, description, active, display_order)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {SPONSOR_COLUMNS}"
    );
    let row = sqlx::query_as::<_, SponsorRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(&sponsor.name)
        .bind(sponsor.tier.as_str())
        .bind(&sponsor.logo_url)
        .bind(&sponsor.website_url)
        .bind(SqlJson(&sponsor.description))
        .bind(sponsor.active)
        .bind(sponsor.display_order)
        .fetch_one(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to create sponsor"))?;

    info!(sponsor_id = %row.id, tier = %sponsor.tier, "sponsor created");
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_sponsor(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<SponsorInput>,
) -> ApiResult<SponsorRow> {
    let sponsor = validate(input)?;
    let sql = format!(
        "UPDATE sponsors
         SET name = $2, tier = $3, logo_url = $4, website_url = $5, description = $6,
             active = $7, display_order = $8, updated_at = NOW()
         WHERE id = $1
         RETURNING {SPONSOR_COLUMNS}"
    );
    sqlx::query_as::<_, SponsorRow>(&sql)
        .bind(id)
        .bind(&sponsor.name)
        .bind(sponsor.tier.as_str())
        .bind(&sponsor.logo_url)
        .bind(&sponsor.website_url)
        .bind(SqlJson(&sponsor.description))
        .bind(sponsor.active)
        .bind(sponsor.display_order)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to update sponsor"))?
        .map(Json)
        .ok_or_else(|| not_found("Sponsor"))
}

async fn delete_sponsor(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let result = sqlx::query("DELETE FROM sponsors WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete sponsor"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Sponsor"));
    }
    Ok(Deleted::json())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sponsor(name: &str, tier: &str, display_order: i32) -> SponsorRow {
        SponsorRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tier: tier.to_string(),
            logo_url: None,
            website_url: None,
            description: SqlJson(LocalizedText::default()),
            active: true,
            display_order,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn tiers_sort_by_rank_then_display_order() {
        let mut rows = vec![
            sponsor("Print Shop", "partner", 0),
            sponsor("Cloud Co", "gold", 2),
            sponsor("Chip Inc", "platinum", 5),
            sponsor("Mystery", "diamond", 0),
            sponsor("Board House", "gold", 1),
        ];
        sort_sponsors(&mut rows);
        let names: Vec<_> = rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(
            names,
            ["Chip Inc", "Board House", "Cloud Co", "Print Shop", "Mystery"]
        );
    }

    #[test]
    fn tier_parsing_is_case_insensitive() {
        assert_eq!("Silver".parse::<SponsorTier>(), Ok(SponsorTier::Silver));
        assert!("diamond".parse::<SponsorTier>().is_err());
        assert!(SponsorTier::Platinum.rank() < SponsorTier::Partner.rank());
    }
}
