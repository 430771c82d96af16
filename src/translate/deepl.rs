use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use serde::Deserialize;

use super::{TranslateError, Translator};

const FREE_ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";
const PRO_ENDPOINT: &str = "https://api.deepl.com/v2/translate";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_PREVIEW_CHARS: usize = 300;

/// DeepL REST client. Free-tier keys carry a `:fx` suffix.
#[derive(Clone)]
pub struct DeepLClient {
    http: Client,
    api_key: String,
    endpoint: &'static str,
}

impl DeepLClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build DeepL HTTP client")?;

        Ok(Self {
            endpoint: endpoint_for(&api_key),
            http,
            api_key,
        })
    }
}

fn endpoint_for(api_key: &str) -> &'static str {
    if api_key.ends_with(":fx") {
        FREE_ENDPOINT
    } else {
        PRO_ENDPOINT
    }
}

/// DeepL wants regional variants for a few target languages.
fn target_code(lang: &str) -> String {
    match lang.to_ascii_lowercase().as_str() {
        "en" => "EN-US".to_string(),
        "pt" => "PT-PT".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

fn source_code(lang: &str) -> String {
    lang.split('-')
        .next()
        .unwrap_or(lang)
        .to_ascii_uppercase()
}

impl Translator for DeepLClient {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError> {
        let payload = serde_json::json!({
            "text": [text],
            "source_lang": source_code(source_lang),
            "target_lang": target_code(target_lang),
        });

        let response = self
            .http
            .post(self.endpoint)
            .header(AUTHORIZATION, format!("DeepL-Auth-Key {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|err| TranslateError::Failed(anyhow!(err).context("DeepL request failed")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TranslateError::RateLimited);
        }

        let body = response
            .text()
            .await
            .map_err(|err| TranslateError::Failed(anyhow!(err).context("failed to read DeepL body")))?;

        if !status.is_success() {
            let preview: String = body.chars().take(ERROR_PREVIEW_CHARS).collect();
            return Err(TranslateError::Failed(anyhow!(
                "DeepL call failed with status {status}: {preview}"
            )));
        }

        let parsed: DeepLResponse = serde_json::from_str(&body).map_err(|err| {
            TranslateError::Failed(anyhow!(err).context("failed to parse DeepL response"))
        })?;

        parsed
            .translations
            .into_iter()
            .next()
            .map(|translation| translation.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| TranslateError::Failed(anyhow!("DeepL returned no translation")))
    }
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    #[serde(default)]
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}
