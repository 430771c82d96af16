pub mod access;
pub mod analytics;
pub mod announcements;
pub mod comments;
pub mod events;
pub mod forum;
pub mod inventory;
pub mod media_kit;
pub mod members;
pub mod projects;
pub mod sponsors;
pub mod translations;

use axum::http::StatusCode;
use serde::Deserialize;

use crate::web::{
    LocalizedText, ReviewStatus,
    models::{is_valid_slug, slugify},
    responses::{HandlerError, bad_request, json_error},
};

#[derive(Debug, Deserialize)]
pub(crate) struct StatusUpdate {
    pub status: ReviewStatus,
}

/// Checks a stored status against the requested one.
/// `Ok(false)` means nothing needs to be written.
pub(crate) fn check_transition(current: &str, next: ReviewStatus) -> Result<bool, HandlerError> {
    let current: ReviewStatus = current.parse().map_err(|_| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Stored status is not recognised.",
        )
    })?;

    current
        .transition(next)
        .map_err(|err| json_error(StatusCode::CONFLICT, format!("Invalid status change: {err}.")))
}

/// Trims an optional text field, mapping blank input to `None`.
pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Normalizes a localized field and rejects it when every language is blank.
pub(crate) fn require_localized(
    text: LocalizedText,
    field: &str,
) -> Result<LocalizedText, HandlerError> {
    let text = text.normalized();
    if text.is_blank() {
        return Err(bad_request(format!("{field} needs text in at least one language.")));
    }
    Ok(text)
}

/// Uses the explicit slug when given, otherwise derives one from the title.
pub(crate) fn resolve_slug(
    explicit: Option<&str>,
    title: &LocalizedText,
    locale: &str,
) -> Result<String, HandlerError> {
    match explicit.map(str::trim).filter(|slug| !slug.is_empty()) {
        Some(slug) if is_valid_slug(slug) => Ok(slug.to_string()),
        Some(_) => Err(bad_request(
            "Slug may only contain lowercase letters, digits and single dashes.",
        )),
        None => title
            .preferred(locale)
            .and_then(slugify)
            .ok_or_else(|| bad_request("Could not derive a slug from the title.")),
    }
}

pub(crate) fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_slug_prefers_explicit_value() {
        let title = LocalizedText::from_pairs([("en", "Spring Meetup"), ("tr", "Bahar Buluşması")]);
        assert_eq!(resolve_slug(Some("meetup-2025"), &title, "en").unwrap(), "meetup-2025");
        assert_eq!(resolve_slug(None, &title, "tr").unwrap(), "bahar-bulusmasi");
        assert_eq!(resolve_slug(Some("  "), &title, "en").unwrap(), "spring-meetup");
        assert!(resolve_slug(Some("Bad Slug"), &title, "en").is_err());
        assert!(resolve_slug(None, &LocalizedText::default(), "en").is_err());
    }

    #[test]
    fn require_localized_rejects_blank_text() {
        assert!(require_localized(LocalizedText::from_pairs([("en", " ")]), "Title").is_err());
        let text = require_localized(LocalizedText::from_pairs([("en", " Hi ")]), "Title").unwrap();
        assert_eq!(text.get("en"), Some("Hi"));
    }

    #[test]
    fn clamp_limit_bounds_input() {
        assert_eq!(clamp_limit(None, 20, 100), 20);
        assert_eq!(clamp_limit(Some(0), 20, 100), 1);
        assert_eq!(clamp_limit(Some(1000), 20, 100), 100);
    }

    #[test]
    fn check_transition_reports_conflicts() {
        assert!(check_transition("pending", ReviewStatus::Approved).unwrap());
        assert!(!check_transition("approved", ReviewStatus::Approved).unwrap());

        let (status, body) = check_transition("cancelled", ReviewStatus::Pending).unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.error.contains("cancelled"));

        let (status, _) = check_transition("archived", ReviewStatus::Pending).unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn clean_optional_drops_blank_values() {
        assert_eq!(clean_optional(Some("  lab 3 ".into())), Some("lab 3".into()));
        assert_eq!(clean_optional(Some("   ".into())), None);
        assert_eq!(clean_optional(None), None);
    }
}
