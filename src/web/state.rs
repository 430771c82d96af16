use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    gate::RequestGate,
    translate::DeepLClient,
    web::auth::SessionKeys,
};

#[derive(Debug)]
struct SiteSettings {
    default_locale: String,
    cookie_secure: bool,
}

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    gate: RequestGate,
    sessions: SessionKeys,
    translator: Option<DeepLClient>,
    settings: Arc<SiteSettings>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let translator = match config.deepl_api_key.as_deref() {
            Some(key) => Some(DeepLClient::new(key).context("failed to initialize DeepL client")?),
            None => {
                warn!("DEEPL_API_KEY is not set; batch translation is disabled");
                None
            }
        };

        info!(default_locale = %config.default_locale, "application state ready");

        Ok(Self {
            pool,
            gate: RequestGate::new(config.admin),
            sessions: SessionKeys::new(config.jwt_secret.as_bytes()),
            translator,
            settings: Arc::new(SiteSettings {
                default_locale: config.default_locale,
                cookie_secure: config.cookie_secure,
            }),
        })
    }

    #[cfg(test)]
    pub fn for_tests(pool: PgPool, gate: RequestGate) -> Self {
        Self {
            pool,
            gate,
            sessions: SessionKeys::new(b"test-session-secret-of-32-bytes!"),
            translator: None,
            settings: Arc::new(SiteSettings {
                default_locale: "en".to_string(),
                cookie_secure: false,
            }),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn gate(&self) -> RequestGate {
        self.gate.clone()
    }

    pub fn sessions(&self) -> &SessionKeys {
        &self.sessions
    }

    pub fn translator(&self) -> Option<&DeepLClient> {
        self.translator.as_ref()
    }

    pub fn default_locale(&self) -> &str {
        &self.settings.default_locale
    }

    pub fn cookie_secure(&self) -> bool {
        self.settings.cookie_secure
    }
}
