use std::fmt::Debug;

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::error;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

pub type HandlerError = (StatusCode, Json<ApiError>);
pub type ApiResult<T> = Result<Json<T>, HandlerError>;

/// Helper for controllers that need to return `(StatusCode, Json<ApiError>)`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (status, Json(ApiError::new(message)))
}

/// Logs the underlying failure and hides it behind a generic 500.
pub fn internal_error(err: impl Debug, context: &'static str) -> HandlerError {
    error!(?err, "{context}");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error.",
    )
}

pub fn not_found(what: &str) -> HandlerError {
    json_error(StatusCode::NOT_FOUND, format!("{what} not found."))
}

pub fn bad_request(message: impl Into<String>) -> HandlerError {
    json_error(StatusCode::BAD_REQUEST, message)
}

pub fn conflict(message: impl Into<String>) -> HandlerError {
    json_error(StatusCode::CONFLICT, message)
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    database_code(err).as_deref() == Some(UNIQUE_VIOLATION)
}

pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    database_code(err).as_deref() == Some(FOREIGN_KEY_VIOLATION)
}

fn database_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Maps a write failure: unique violations become 409, the rest a logged 500.
pub fn write_error(
    err: sqlx::Error,
    conflict_message: &str,
    context: &'static str,
) -> HandlerError {
    if is_unique_violation(&err) {
        conflict(conflict_message)
    } else {
        internal_error(err, context)
    }
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: bool,
}

impl Deleted {
    pub fn json() -> Json<Self> {
        Json(Self { deleted: true })
    }
}
