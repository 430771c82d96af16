use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction, types::Json as SqlJson};
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState, LocalizedText, ReviewStatus,
    auth::approved_member,
    responses::{
        ApiResult, Deleted, HandlerError, bad_request, conflict, internal_error, not_found,
        write_error,
    },
};

use super::{StatusUpdate, check_transition, clean_optional, require_localized, resolve_slug};

const EVENT_COLUMNS: &str = "e.id, e.slug, e.title, e.description, e.location, e.starts_at, e.ends_at,
     e.capacity, e.registration_open, e.published, e.created_at, e.updated_at,
     (SELECT COUNT(*) FROM registrations r
      WHERE r.event_id = e.id AND r.status IN ('pending', 'approved')) AS active_registrations";
/// An event counts as upcoming until it has ended, so running events stay listed.
pub(crate) const UPCOMING_PREDICATE: &str = "e.ends_at >= NOW()";
const SLUG_TAKEN: &str = "An event with this slug already exists.";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub slug: String,
    pub title: SqlJson<LocalizedText>,
    pub description: SqlJson<LocalizedText>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: Option<i32>,
    pub registration_open: bool,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_registrations: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RegistrationRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub member_id: Uuid,
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RegistrantRow {
    pub id: Uuid,
    pub member_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub student_number: String,
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EventScope {
    #[default]
    Upcoming,
    Past,
    All,
}

#[derive(Default, Deserialize)]
pub(crate) struct EventQuery {
    #[serde(default)]
    scope: EventScope,
}

#[derive(Deserialize)]
pub(crate) struct EventInput {
    #[serde(default)]
    slug: Option<String>,
    title: LocalizedText,
    #[serde(default)]
    description: LocalizedText,
    #[serde(default)]
    location: Option<String>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    #[serde(default)]
    capacity: Option<i32>,
    #[serde(default = "default_true")]
    registration_open: bool,
    #[serde(default = "default_true")]
    published: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Default, Deserialize)]
pub(crate) struct RegistrationInput {
    #[serde(default)]
    note: Option<String>,
}

/// Registration-relevant columns, read under a row lock.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventAvailability {
    pub published: bool,
    pub registration_open: bool,
    pub ends_at: DateTime<Utc>,
    pub capacity: Option<i32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events", get(list_events).post(create_event))
        .route(
            "/api/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route(
            "/api/events/:id/register",
            post(register).delete(cancel_registration),
        )
        .route(
            "/api/admin/events/:id/registrations",
            get(list_registrations),
        )
        .route(
            "/api/admin/registrations/:id/status",
            patch(update_registration_status),
        )
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Vec<EventRow>> {
    let filter = match query.scope {
        EventScope::Upcoming => format!("AND {UPCOMING_PREDICATE} ORDER BY e.starts_at ASC"),
        EventScope::Past => format!("AND NOT ({UPCOMING_PREDICATE}) ORDER BY e.starts_at DESC"),
        EventScope::All => "ORDER BY e.starts_at DESC".to_string(),
    };
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.published {filter}");

    sqlx::query_as::<_, EventRow>(&sql)
        .fetch_all(state.pool())
        .await
        .map(Json)
        .map_err(|err| internal_error(err, "failed to list events"))
}

async fn get_event(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult<EventRow> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.slug = $1 AND e.published");
    sqlx::query_as::<_, EventRow>(&sql)
        .bind(slug)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to load event"))?
        .map(Json)
        .ok_or_else(|| not_found("Event"))
}

async fn fetch_event_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<EventRow>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = $1");
    sqlx::query_as::<_, EventRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

struct ValidEvent {
    slug: String,
    title: LocalizedText,
    description: LocalizedText,
    location: Option<String>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    capacity: Option<i32>,
    registration_open: bool,
    published: bool,
}

fn validate(state: &AppState, input: EventInput) -> Result<ValidEvent, HandlerError> {
    let title = require_localized(input.title, "Title")?;
    let slug = resolve_slug(input.slug.as_deref(), &title, state.default_locale())?;

    if input.ends_at < input.starts_at {
        return Err(bad_request("Event cannot end before it starts."));
    }
    if input.capacity.is_some_and(|capacity| capacity <= 0) {
        return Err(bad_request("Capacity must be a positive number."));
    }

    Ok(ValidEvent {
        slug,
        title,
        description: input.description.normalized(),
        location: clean_optional(input.location),
        starts_at: input.starts_at,
        ends_at: input.ends_at,
        capacity: input.capacity,
        registration_open: input.registration_open,
        published: input.published,
    })
}

async fn create_event(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> Result<(StatusCode, Json<EventRow>), HandlerError> {
    let event = validate(&state, input)?;
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO events (id, slug, title, description, location, starts_at, ends_at, capacity, registration_open, published)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(id)
    .bind(&event.slug)
    .bind(SqlJson(&event.title))
    .bind(SqlJson(&event.description))
    .bind(&event.location)
    .bind(event.starts_at)
    .bind(event.ends_at)
    .bind(event.capacity)
    .bind(event.registration_open)
    .bind(event.published)
    .execute(state.pool())
    .await
    .map_err(|err| write_error(err, SLUG_TAKEN, "failed to create event"))?;

    info!(event_id = %id, slug = %event.slug, "event created");

    let row = fetch_event_by_id(state.pool(), id)
        .await
        .map_err(|err| internal_error(err, "failed to reload event"))?
        .ok_or_else(|| not_found("Event"))?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<EventInput>,
) -> ApiResult<EventRow> {
    let event = validate(&state, input)?;

    let result = sqlx::query(
        "UPDATE events
         SET slug = $2, title = $3, description = $4, location = $5, starts_at = $6, ends_at = $7,
             capacity = $8, registration_open = $9, published = $10, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(&event.slug)
    .bind(SqlJson(&event.title))
    .bind(SqlJson(&event.description))
    .bind(&event.location)
    .bind(event.starts_at)
    .bind(event.ends_at)
    .bind(event.capacity)
    .bind(event.registration_open)
    .bind(event.published)
    .execute(state.pool())
    .await
    .map_err(|err| write_error(err, SLUG_TAKEN, "failed to update event"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Event"));
    }

    fetch_event_by_id(state.pool(), id)
        .await
        .map_err(|err| internal_error(err, "failed to reload event"))?
        .map(Json)
        .ok_or_else(|| not_found("Event"))
}

async fn delete_event(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let result = sqlx::query("DELETE FROM events WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete event"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Event"));
    }

    sqlx::query("DELETE FROM comments WHERE target_type = 'event' AND target_id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete event comments"))?;

    info!(event_id = %id, "event deleted");
    Ok(Deleted::json())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RegistrationRefusal {
    /// The member already has a row for this event, whatever its status.
    AlreadyRegistered(String),
    Closed,
    Ended,
    Full,
}

impl RegistrationRefusal {
    fn message(&self) -> String {
        match self {
            RegistrationRefusal::AlreadyRegistered(status) => {
                format!("You already have a registration for this event ({status}).")
            }
            RegistrationRefusal::Closed => "Registration for this event is closed.".to_string(),
            RegistrationRefusal::Ended => "This event has already ended.".to_string(),
            RegistrationRefusal::Full => "This event is full.".to_string(),
        }
    }
}

pub(crate) fn has_free_seat(capacity: Option<i32>, active_registrations: i64) -> bool {
    capacity.is_none_or(|capacity| active_registrations < i64::from(capacity))
}

/// Why a new active registration cannot be taken, if any. `existing` is the
/// status of the member's current row for the event.
pub(crate) fn registration_refusal(
    event: &EventAvailability,
    existing: Option<&str>,
    active_registrations: i64,
    now: DateTime<Utc>,
) -> Option<RegistrationRefusal> {
    if let Some(status) = existing {
        return Some(RegistrationRefusal::AlreadyRegistered(status.to_string()));
    }
    if !event.published || !event.registration_open {
        return Some(RegistrationRefusal::Closed);
    }
    if event.ends_at < now {
        return Some(RegistrationRefusal::Ended);
    }
    if !has_free_seat(event.capacity, active_registrations) {
        return Some(RegistrationRefusal::Full);
    }
    None
}

async fn lock_event(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
) -> Result<EventAvailability, HandlerError> {
    sqlx::query_as::<_, EventAvailability>(
        "SELECT published, registration_open, ends_at, capacity FROM events WHERE id = $1 FOR UPDATE",
    )
    .bind(event_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|err| internal_error(err, "failed to lock event"))?
    .ok_or_else(|| not_found("Event"))
}

async fn count_active(tx: &mut Transaction<'_, Postgres>, event_id: Uuid) -> Result<i64, HandlerError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM registrations WHERE event_id = $1 AND status IN ('pending', 'approved')",
    )
    .bind(event_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| internal_error(err, "failed to count registrations"))
}

async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(event_id): Path<Uuid>,
    body: Option<Json<RegistrationInput>>,
) -> Result<(StatusCode, Json<RegistrationRow>), HandlerError> {
    let member = approved_member(&state, &jar).await?;
    let note = body.and_then(|Json(input)| clean_optional(input.note));

    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|err| internal_error(err, "failed to open registration transaction"))?;

    let availability = lock_event(&mut tx, event_id).await?;

    let existing: Option<String> = sqlx::query_scalar(
        "SELECT status FROM registrations WHERE event_id = $1 AND member_id = $2",
    )
    .bind(event_id)
    .bind(member.id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| internal_error(err, "failed to check existing registration"))?;

    let active = count_active(&mut tx, event_id).await?;
    if let Some(refusal) =
        registration_refusal(&availability, existing.as_deref(), active, Utc::now())
    {
        return Err(conflict(refusal.message()));
    }

    let row = sqlx::query_as::<_, RegistrationRow>(
        "INSERT INTO registrations (id, event_id, member_id, status, note)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, event_id, member_id, status, note, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(event_id)
    .bind(member.id)
    .bind(ReviewStatus::Pending.as_str())
    .bind(note)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| {
        write_error(
            err,
            "You already have a registration for this event.",
            "failed to insert registration",
        )
    })?;

    tx.commit()
        .await
        .map_err(|err| internal_error(err, "failed to commit registration"))?;

    info!(%event_id, member_id = %member.id, "event registration created");
    Ok((StatusCode::CREATED, Json(row)))
}

async fn cancel_registration(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(event_id): Path<Uuid>,
) -> ApiResult<RegistrationRow> {
    let member = approved_member(&state, &jar).await?;

    let current = sqlx::query_as::<_, RegistrationRow>(
        "SELECT id, event_id, member_id, status, note, created_at, updated_at
         FROM registrations WHERE event_id = $1 AND member_id = $2",
    )
    .bind(event_id)
    .bind(member.id)
    .fetch_optional(state.pool())
    .await
    .map_err(|err| internal_error(err, "failed to load registration"))?
    .ok_or_else(|| not_found("Registration"))?;

    if !check_transition(&current.status, ReviewStatus::Cancelled)? {
        return Ok(Json(current));
    }

    sqlx::query_as::<_, RegistrationRow>(
        "UPDATE registrations SET status = $2, updated_at = NOW() WHERE id = $1
         RETURNING id, event_id, member_id, status, note, created_at, updated_at",
    )
    .bind(current.id)
    .bind(ReviewStatus::Cancelled.as_str())
    .fetch_one(state.pool())
    .await
    .map(Json)
    .map_err(|err| internal_error(err, "failed to cancel registration"))
}

async fn list_registrations(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Vec<RegistrantRow>> {
    sqlx::query_as::<_, RegistrantRow>(
        "SELECT r.id, r.member_id, m.full_name, m.email, m.student_number, r.status, r.note, r.created_at
         FROM registrations r
         JOIN members m ON m.id = r.member_id
         WHERE r.event_id = $1
         ORDER BY r.created_at",
    )
    .bind(event_id)
    .fetch_all(state.pool())
    .await
    .map(Json)
    .map_err(|err| internal_error(err, "failed to list registrations"))
}

async fn update_registration_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdate>,
) -> ApiResult<RegistrationRow> {
    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|err| internal_error(err, "failed to open registration transaction"))?;

    let current = sqlx::query_as::<_, RegistrationRow>(
        "SELECT id, event_id, member_id, status, note, created_at, updated_at
         FROM registrations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| internal_error(err, "failed to load registration"))?
    .ok_or_else(|| not_found("Registration"))?;

    if !check_transition(&current.status, payload.status)? {
        return Ok(Json(current));
    }

    let reactivating = payload.status.is_active()
        && !current
            .status
            .parse::<ReviewStatus>()
            .is_ok_and(ReviewStatus::is_active);
    if reactivating {
        let availability = lock_event(&mut tx, current.event_id).await?;
        let active = count_active(&mut tx, current.event_id).await?;
        if !has_free_seat(availability.capacity, active) {
            return Err(conflict(RegistrationRefusal::Full.message()));
        }
    }

    let updated = sqlx::query_as::<_, RegistrationRow>(
        "UPDATE registrations SET status = $2, updated_at = NOW() WHERE id = $1
         RETURNING id, event_id, member_id, status, note, created_at, updated_at",
    )
    .bind(id)
    .bind(payload.status.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| internal_error(err, "failed to update registration"))?;

    tx.commit()
        .await
        .map_err(|err| internal_error(err, "failed to commit registration update"))?;

    info!(registration_id = %id, from = %current.status, to = %payload.status, "registration status changed");
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_event(capacity: Option<i32>) -> EventAvailability {
        EventAvailability {
            published: true,
            registration_open: true,
            ends_at: Utc::now() + Duration::days(3),
            capacity,
        }
    }

    #[test]
    fn registration_allowed_with_free_seats() {
        assert_eq!(
            registration_refusal(&open_event(Some(10)), None, 9, Utc::now()),
            None
        );
        assert_eq!(
            registration_refusal(&open_event(None), None, 10_000, Utc::now()),
            None
        );
    }

    #[test]
    fn registration_refused_when_full() {
        assert_eq!(
            registration_refusal(&open_event(Some(10)), None, 10, Utc::now()),
            Some(RegistrationRefusal::Full)
        );
        assert!(!has_free_seat(Some(0), 0));
        assert!(has_free_seat(None, i64::MAX));
    }

    #[test]
    fn existing_registration_of_any_status_is_a_duplicate() {
        let event = open_event(Some(10));
        for status in ReviewStatus::ALL {
            assert_eq!(
                registration_refusal(&event, Some(status.as_str()), 3, Utc::now()),
                Some(RegistrationRefusal::AlreadyRegistered(
                    status.as_str().to_string()
                )),
                "{status}"
            );
        }
    }

    #[test]
    fn duplicate_is_reported_before_capacity_so_seats_are_not_counted_twice() {
        // A member already holding one of the two seats asks again.
        let event = open_event(Some(2));
        let refusal = registration_refusal(&event, Some("pending"), 2, Utc::now());
        assert_eq!(
            refusal,
            Some(RegistrationRefusal::AlreadyRegistered("pending".into()))
        );
        assert_eq!(
            refusal.map(|refusal| refusal.message()),
            Some("You already have a registration for this event (pending).".to_string())
        );

        // Another member still gets the remaining seat, then the event is full.
        assert_eq!(registration_refusal(&event, None, 1, Utc::now()), None);
        assert_eq!(
            registration_refusal(&event, None, 2, Utc::now()),
            Some(RegistrationRefusal::Full)
        );
    }

    #[test]
    fn registration_refused_when_closed_or_over() {
        let mut closed = open_event(None);
        closed.registration_open = false;
        assert_eq!(
            registration_refusal(&closed, None, 0, Utc::now()),
            Some(RegistrationRefusal::Closed)
        );

        let mut hidden = open_event(None);
        hidden.published = false;
        assert_eq!(
            registration_refusal(&hidden, None, 0, Utc::now()),
            Some(RegistrationRefusal::Closed)
        );

        let finished = open_event(None);
        let later = finished.ends_at + Duration::minutes(1);
        assert_eq!(
            registration_refusal(&finished, None, 0, later),
            Some(RegistrationRefusal::Ended)
        );
    }

    #[test]
    fn event_scope_defaults_to_upcoming() {
        let query: EventQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.scope, EventScope::Upcoming);
        let query: EventQuery = serde_json::from_str(r#"{"scope":"past"}"#).unwrap();
        assert_eq!(query.scope, EventScope::Past);
    }
}
