use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const SLUG_MAX_LEN: usize = 80;

/// Text keyed by lowercase language code, stored as JSONB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<String, String>);

impl LocalizedText {
    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut text = Self::default();
        for (lang, value) in pairs {
            text.set(lang, value);
        }
        text
    }

    /// Non-blank value for `lang`.
    pub fn get(&self, lang: &str) -> Option<&str> {
        self.0
            .get(&lang.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn set(&mut self, lang: impl Into<String>, value: impl Into<String>) {
        let lang = lang.into().trim().to_ascii_lowercase();
        if !lang.is_empty() {
            self.0.insert(lang, value.into());
        }
    }

    /// `lang` when present, otherwise the first non-blank value.
    pub fn preferred(&self, lang: &str) -> Option<&str> {
        self.get(lang).or_else(|| {
            self.0
                .values()
                .map(String::as_str)
                .find(|value| !value.trim().is_empty())
        })
    }

    pub fn is_blank(&self) -> bool {
        self.0.values().all(|value| value.trim().is_empty())
    }

    /// Trims values and drops blank entries.
    pub fn normalized(self) -> Self {
        Self(
            self.0
                .into_iter()
                .filter_map(|(lang, value)| {
                    let lang = lang.trim().to_ascii_lowercase();
                    let value = value.trim().to_string();
                    (!lang.is_empty() && !value.is_empty()).then_some((lang, value))
                })
                .collect(),
        )
    }

    /// Source text to translate, or `None` when there is nothing to do.
    ///
    /// A target that is non-blank and differs from the source counts as
    /// already translated. A target equal to the source is a copy left by
    /// an editor and gets retranslated.
    pub fn pending_translation(&self, source_lang: &str, target_lang: &str) -> Option<&str> {
        let source = self.get(source_lang)?;
        match self.get(target_lang) {
            Some(target) if target.trim() != source.trim() => None,
            _ => Some(source),
        }
    }
}

/// Review lifecycle shared by member applications, registrations and projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 4] = [
        ReviewStatus::Pending,
        ReviewStatus::Approved,
        ReviewStatus::Rejected,
        ReviewStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: ReviewStatus) -> bool {
        use ReviewStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Cancelled)
                | (Approved, Rejected | Cancelled)
                | (Rejected, Pending)
        )
    }

    /// Validates a move to `next`. `Ok(false)` means the status is unchanged.
    pub fn transition(self, next: ReviewStatus) -> Result<bool, InvalidTransition> {
        if self == next {
            return Ok(false);
        }
        if self.can_transition_to(next) {
            Ok(true)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Whether the record still counts against a capacity limit.
    pub fn is_active(self) -> bool {
        matches!(self, ReviewStatus::Pending | ReviewStatus::Approved)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = match value.trim().to_ascii_lowercase().as_str() {
            "canceled" => "cancelled".to_string(),
            other => other.to_string(),
        };
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status {:?}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ReviewStatus,
    pub to: ReviewStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move from {} to {}", self.from, self.to)
    }
}

/// URL slug: lowercase ASCII words joined by single dashes.
pub fn slugify(input: &str) -> Option<String> {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        // combining dot left behind by lowercasing 'İ'
        if ch == '\u{0307}' {
            continue;
        }
        let mapped = match ch {
            'a'..='z' | '0'..='9' => Some(ch),
            'ç' => Some('c'),
            'ğ' => Some('g'),
            'ı' | 'î' | 'ï' | 'í' | 'ì' => Some('i'),
            'ö' | 'ô' | 'ó' | 'ò' => Some('o'),
            'ş' => Some('s'),
            'ü' | 'û' | 'ú' | 'ù' => Some('u'),
            'â' | 'ä' | 'á' | 'à' => Some('a'),
            'é' | 'è' | 'ê' | 'ë' => Some('e'),
            'ñ' => Some('n'),
            _ => None,
        };

        match mapped {
            Some(c) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            }
            None => pending_dash = true,
        }

        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
    }

    let slug = slug.trim_end_matches('-').to_string();
    (!slug.is_empty()).then_some(slug)
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= SLUG_MAX_LEN
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Loose sanity check; delivery is what proves an address.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

pub fn is_http_url(url: &str) -> bool {
    let url = url.trim();
    (url.starts_with("https://") || url.starts_with("http://")) && url.len() > "https://".len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_translation_skips_distinct_targets() {
        let text = LocalizedText::from_pairs([("en", "Welcome"), ("tr", "Hoş geldiniz")]);
        assert_eq!(text.pending_translation("en", "tr"), None);

        let copied = LocalizedText::from_pairs([("en", "Welcome"), ("tr", "Welcome")]);
        assert_eq!(copied.pending_translation("en", "tr"), Some("Welcome"));

        let missing = LocalizedText::from_pairs([("en", "Welcome"), ("tr", "  ")]);
        assert_eq!(missing.pending_translation("en", "tr"), Some("Welcome"));

        let no_source = LocalizedText::from_pairs([("tr", "Merhaba")]);
        assert_eq!(no_source.pending_translation("en", "tr"), None);
    }

    #[test]
    fn localized_text_normalizes_and_falls_back() {
        let text = LocalizedText::from_pairs([(" EN ", "  Hello "), ("tr", "")]).normalized();
        assert_eq!(text.get("en"), Some("Hello"));
        assert_eq!(text.get("tr"), None);
        assert_eq!(text.preferred("de"), Some("Hello"));
        assert!(!text.is_blank());
        assert!(LocalizedText::default().is_blank());
    }

    #[test]
    fn localized_text_serializes_as_plain_map() {
        let text = LocalizedText::from_pairs([("en", "Hi")]);
        assert_eq!(serde_json::to_string(&text).unwrap(), r#"{"en":"Hi"}"#);
    }

    #[test]
    fn review_status_transitions() {
        use ReviewStatus::*;
        assert_eq!(Pending.transition(Approved), Ok(true));
        assert_eq!(Approved.transition(Approved), Ok(false));
        assert_eq!(Rejected.transition(Pending), Ok(true));
        assert!(Rejected.transition(Approved).is_err());
        assert!(Cancelled.transition(Pending).is_err());
        assert!(Approved.transition(Pending).is_err());
    }

    #[test]
    fn review_status_parses_db_values() {
        for status in ReviewStatus::ALL {
            assert_eq!(status.as_str().parse::<ReviewStatus>(), Ok(status));
        }
        assert_eq!("Canceled".parse::<ReviewStatus>(), Ok(ReviewStatus::Cancelled));
        assert!("archived".parse::<ReviewStatus>().is_err());
    }

    #[test]
    fn slugify_transliterates_and_collapses() {
        assert_eq!(
            slugify("Yazılım Günleri 2025!").as_deref(),
            Some("yazilim-gunleri-2025")
        );
        assert_eq!(slugify("  --Hello,   World--  ").as_deref(), Some("hello-world"));
        assert_eq!(slugify("!!!"), None);
        assert!(slugify(&"a".repeat(200)).unwrap().len() <= SLUG_MAX_LEN);
    }

    #[test]
    fn slug_validation() {
        assert!(is_valid_slug("spring-hackathon-2025"));
        assert!(!is_valid_slug("Spring"));
        assert!(!is_valid_slug("a--b"));
        assert!(!is_valid_slug("-a"));
    }

    #[test]
    fn email_and_url_checks() {
        assert!(is_plausible_email("ada@uni.edu.tr"));
        assert!(!is_plausible_email("ada@localhost"));
        assert!(!is_plausible_email("ada uni@x.org"));
        assert!(is_http_url("https://github.com/club/repo"));
        assert!(!is_http_url("javascript:alert(1)"));
    }
}
