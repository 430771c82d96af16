mod deepl;

pub use deepl::DeepLClient;

use std::{fmt, future::Future, time::Duration};

use serde::Serialize;
use tokio::time::sleep;
use tracing::warn;

use crate::LocalizedText;

#[derive(Debug)]
pub enum TranslateError {
    /// Upstream answered 429.
    RateLimited,
    Failed(anyhow::Error),
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslateError::RateLimited => f.write_str("translation provider rate limited"),
            TranslateError::Failed(err) => write!(f, "{err:#}"),
        }
    }
}

pub trait Translator {
    fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> impl Future<Output = Result<String, TranslateError>> + Send;
}

/// Timing for a batch: a fixed gap between calls and a linear backoff on 429.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub call_delay: Duration,
    pub backoff_step: Duration,
    pub max_retries: u32,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            call_delay: Duration::from_millis(500),
            backoff_step: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub documents: u32,
    pub updated_documents: u32,
    pub translated: u32,
    pub skipped: u32,
    pub failed: u32,
    pub retries: u32,
}

/// Sequential translation of localized fields, one provider call at a time.
pub struct BatchRunner<'a, T> {
    translator: &'a T,
    pacing: Pacing,
    source_lang: String,
    target_lang: String,
    calls_made: u32,
    summary: BatchSummary,
}

impl<'a, T: Translator> BatchRunner<'a, T> {
    pub fn new(translator: &'a T, pacing: Pacing, source_lang: &str, target_lang: &str) -> Self {
        Self {
            translator,
            pacing,
            source_lang: source_lang.trim().to_ascii_lowercase(),
            target_lang: target_lang.trim().to_ascii_lowercase(),
            calls_made: 0,
            summary: BatchSummary::default(),
        }
    }

    /// Translates every field of one document. Returns true when any field changed.
    pub async fn translate_document(&mut self, fields: &mut [&mut LocalizedText]) -> bool {
        self.summary.documents += 1;
        let mut changed = false;

        for field in fields.iter_mut() {
            let Some(source) = field
                .pending_translation(&self.source_lang, &self.target_lang)
                .map(str::to_string)
            else {
                self.summary.skipped += 1;
                continue;
            };

            match self.translate_with_retry(&source).await {
                Ok(translated) => {
                    field.set(self.target_lang.clone(), translated);
                    self.summary.translated += 1;
                    changed = true;
                }
                Err(err) => {
                    warn!(error = %err, "field translation failed");
                    self.summary.failed += 1;
                }
            }
        }

        if changed {
            self.summary.updated_documents += 1;
        }
        changed
    }

    async fn translate_with_retry(&mut self, text: &str) -> Result<String, TranslateError> {
        let mut retries = 0;
        loop {
            if self.calls_made > 0 && !self.pacing.call_delay.is_zero() {
                sleep(self.pacing.call_delay).await;
            }
            self.calls_made += 1;

            match self
                .translator
                .translate(text, &self.source_lang, &self.target_lang)
                .await
            {
                Ok(translated) => return Ok(translated),
                Err(TranslateError::RateLimited) if retries < self.pacing.max_retries => {
                    retries += 1;
                    self.summary.retries += 1;
                    let wait = self.pacing.backoff_step * retries;
                    warn!(retries, wait_ms = wait.as_millis() as u64, "rate limited, backing off");
                    sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn summary(&self) -> BatchSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct ScriptedTranslator {
        // Each call pops one scripted outcome; `None` means succeed.
        script: Arc<Mutex<VecDeque<Option<&'static str>>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTranslator {
        fn with_script(script: Vec<Option<&'static str>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Translator for ScriptedTranslator {
        async fn translate(
            &self,
            text: &str,
            _source_lang: &str,
            target_lang: &str,
        ) -> Result<String, TranslateError> {
            self.calls.lock().unwrap().push(text.to_string());
            let outcome = self.script.lock().unwrap().pop_front().flatten();
            match outcome {
                Some("429") => Err(TranslateError::RateLimited),
                Some(other) => Err(TranslateError::Failed(anyhow::anyhow!(other))),
                None => Ok(format!("[{target_lang}] {text}")),
            }
        }
    }

    fn instant() -> Pacing {
        Pacing {
            call_delay: Duration::ZERO,
            backoff_step: Duration::ZERO,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn skips_fields_already_translated() {
        let translator = ScriptedTranslator::default();
        let mut title = LocalizedText::from_pairs([("en", "Hackathon"), ("tr", "Hackathon Günü")]);
        let mut body = LocalizedText::from_pairs([("en", "Bring a laptop")]);

        let mut runner = BatchRunner::new(&translator, instant(), "en", "tr");
        let changed = runner.translate_document(&mut [&mut title, &mut body]).await;

        assert!(changed);
        assert_eq!(title.get("tr"), Some("Hackathon Günü"));
        assert_eq!(body.get("tr"), Some("[tr] Bring a laptop"));
        assert_eq!(translator.calls(), vec!["Bring a laptop".to_string()]);

        let summary = runner.summary();
        assert_eq!(summary.translated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.updated_documents, 1);
    }

    #[tokio::test]
    async fn retries_rate_limits_until_success() {
        let translator = ScriptedTranslator::with_script(vec![Some("429"), Some("429"), None]);
        let mut field = LocalizedText::from_pairs([("en", "Welcome")]);

        let mut runner = BatchRunner::new(&translator, instant(), "en", "tr");
        assert!(runner.translate_document(&mut [&mut field]).await);

        assert_eq!(translator.calls().len(), 3);
        assert_eq!(runner.summary().retries, 2);
        assert_eq!(field.get("tr"), Some("[tr] Welcome"));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let translator = ScriptedTranslator::with_script(vec![Some("429"); 10]);
        let mut field = LocalizedText::from_pairs([("en", "Welcome")]);

        let mut runner = BatchRunner::new(&translator, instant(), "en", "tr");
        assert!(!runner.translate_document(&mut [&mut field]).await);

        assert_eq!(translator.calls().len(), 4);
        assert_eq!(runner.summary().failed, 1);
        assert_eq!(field.get("tr"), None);
    }

    #[tokio::test]
    async fn other_failures_do_not_stop_the_batch() {
        let translator = ScriptedTranslator::with_script(vec![Some("boom"), None]);
        let mut first = LocalizedText::from_pairs([("en", "One")]);
        let mut second = LocalizedText::from_pairs([("en", "Two")]);

        let mut runner = BatchRunner::new(&translator, instant(), "en", "tr");
        runner.translate_document(&mut [&mut first]).await;
        runner.translate_document(&mut [&mut second]).await;

        let summary = runner.summary();
        assert_eq!(summary.documents, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.translated, 1);
        assert_eq!(second.get("tr"), Some("[tr] Two"));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_linearly() {
        let translator = ScriptedTranslator::with_script(vec![Some("429"), Some("429"), None]);
        let mut field = LocalizedText::from_pairs([("en", "Paced")]);
        let pacing = Pacing {
            call_delay: Duration::from_millis(100),
            backoff_step: Duration::from_secs(1),
            max_retries: 3,
        };

        let started = tokio::time::Instant::now();
        let mut runner = BatchRunner::new(&translator, pacing, "en", "tr");
        runner.translate_document(&mut [&mut field]).await;

        // 1s + 2s of backoff plus two 100ms gaps before the retried calls.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3300), "{elapsed:?}");
    }
}
