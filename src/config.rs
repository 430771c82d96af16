use std::env;

use anyhow::{Context, Result, bail};

use crate::gate::AdminCredentials;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOCALE: &str = "en";
const MIN_JWT_SECRET_LEN: usize = 32;

/// Process-wide settings read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub admin: AdminCredentials,
    pub jwt_secret: String,
    pub deepl_api_key: Option<String>,
    pub default_locale: String,
    pub cookie_secure: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("PORT must be a valid port number, got {raw:?}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let username = required_non_empty("ADMIN_USERNAME")?;
        let password = required_non_empty("ADMIN_PASSWORD")?;

        let jwt_secret = required_non_empty("JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes long");
        }

        let deepl_api_key = env::var("DEEPL_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let default_locale = env::var("DEFAULT_LOCALE")
            .ok()
            .map(|locale| locale.trim().to_ascii_lowercase())
            .filter(|locale| !locale.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());

        let cookie_secure = match env::var("COOKIE_SECURE") {
            Ok(raw) => parse_flag(&raw)
                .with_context(|| format!("COOKIE_SECURE must be true or false, got {raw:?}"))?,
            Err(_) => true,
        };

        Ok(Self {
            database_url,
            port,
            admin: AdminCredentials::new(username, password),
            jwt_secret,
            deepl_api_key,
            default_locale,
            cookie_secure,
        })
    }
}

fn required_non_empty(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("{name} env var is missing"))?;
    if value.trim().is_empty() {
        bail!("{name} env var must not be empty");
    }
    Ok(value)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
