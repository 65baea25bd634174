use anyhow::Result;
use common::NormalizeConfig;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::{EventBus, StoredEvent};
use crate::llm::{extract_json_object, LlmProvider, LlmRequest};
use crate::model::{EventType, NormalizeFailure, NormalizedItem, PersistedRecord, RawItem, Sentiment};
use crate::scraping::truncate_chars;
use crate::storage::{persist, PersistOutcome, RecordStore};

/// Share of target-script letters a response needs to pass the language gate
pub const SCRIPT_RATIO_THRESHOLD: f64 = 0.3;

/// Writing systems the language gate can check for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Cyrillic,
    Latin,
    Greek,
    Arabic,
    Hebrew,
    Han,
}

impl Script {
    pub fn contains(&self, c: char) -> bool {
        match self {
            Script::Cyrillic => matches!(c, '\u{0400}'..='\u{052F}'),
            Script::Latin => c.is_ascii_alphabetic() || matches!(c, '\u{00C0}'..='\u{024F}'),
            Script::Greek => matches!(c, '\u{0370}'..='\u{03FF}'),
            Script::Arabic => matches!(c, '\u{0600}'..='\u{06FF}'),
            Script::Hebrew => matches!(c, '\u{0590}'..='\u{05FF}'),
            Script::Han => matches!(c, '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}'),
        }
    }
}

impl FromStr for Script {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cyrillic" => Ok(Script::Cyrillic),
            "latin" => Ok(Script::Latin),
            "greek" => Ok(Script::Greek),
            "arabic" => Ok(Script::Arabic),
            "hebrew" => Ok(Script::Hebrew),
            "han" | "chinese" => Ok(Script::Han),
            other => anyhow::bail!("unknown script '{}'", other),
        }
    }
}

/// Fraction of alphabetic characters that belong to `script`. 0.0 for text without letters.
pub fn script_ratio(text: &str, script: Script) -> f64 {
    let (letters, matching) = text
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0usize, 0usize), |(n, m), c| (n + 1, m + usize::from(script.contains(c))));
    if letters == 0 {
        0.0
    } else {
        matching as f64 / letters as f64
    }
}

#[derive(Debug, Clone)]
pub struct NormalizerSettings {
    pub target_language: String,
    pub target_script: Script,
    pub max_prompt_chars: usize,
    pub temperature: f32,
    pub context_window: u32,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            target_language: "Russian".to_string(),
            target_script: Script::Cyrillic,
            max_prompt_chars: 3000,
            temperature: 0.3,
            context_window: 2048,
        }
    }
}

impl NormalizerSettings {
    pub fn from_config(cfg: &NormalizeConfig) -> Result<Self> {
        let d = Self::default();
        let target_script = match cfg.target_script.as_deref() {
            Some(s) => s.parse()?,
            None => d.target_script,
        };
        Ok(Self {
            target_language: cfg.target_language.clone().unwrap_or(d.target_language),
            target_script,
            max_prompt_chars: cfg.max_prompt_chars.unwrap_or(d.max_prompt_chars),
            temperature: cfg.temperature.unwrap_or(d.temperature),
            context_window: cfg.context_window.unwrap_or(d.context_window),
        })
    }
}

/// Per-item LLM summarization and classification with a language-conformance gate.
pub struct Normalizer {
    llm: Arc<dyn LlmProvider>,
    settings: NormalizerSettings,
}

impl Normalizer {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: NormalizerSettings) -> Self {
        Self { llm, settings }
    }

    pub fn settings(&self) -> &NormalizerSettings {
        &self.settings
    }

    pub fn build_prompt(&self, text: &str) -> String {
        let language = &self.settings.target_language;
        let event_types = EventType::VOCABULARY.map(|e| e.as_str()).join(", ");
        format!(
            "You are a news analyst. The text below may be in ANY language.\n\n\
             TASK:\n\
             1. Read the text.\n\
             2. Write a short summary in {language} (1-2 sentences).\n\
             3. Choose the event type from: [{event_types}].\n\
             4. Choose the sentiment from: [positive, neutral, negative].\n\n\
             IMPORTANT:\n\
             - The summary MUST be written in {language}.\n\
             - Even if the source text is in another language, answer ONLY in {language}.\n\
             - Reply with a single flat JSON object and nothing else.\n\n\
             Text: {text}\n\n\
             Answer strictly as JSON without explanations:\n\
             {{\"summary\": \"...\", \"event_type\": \"...\", \"sentiment\": \"...\"}}\n",
            language = language,
            event_types = event_types,
            text = truncate_chars(text, self.settings.max_prompt_chars),
        )
    }

    pub fn reinforcement(&self) -> String {
        format!(
            "\n\nREPEAT THE ANSWER IN {}! The summary must contain no other language.",
            self.settings.target_language.to_uppercase()
        )
    }

    fn conforms(&self, response: &str) -> bool {
        script_ratio(response, self.settings.target_script) > SCRIPT_RATIO_THRESHOLD
    }

    async fn call(&self, prompt: String) -> Result<String> {
        let response = self
            .llm
            .generate(LlmRequest {
                prompt,
                temperature: Some(self.settings.temperature),
                context_window: Some(self.settings.context_window),
                ..LlmRequest::default()
            })
            .await?;
        Ok(response.content.trim().to_string())
    }

    /// Never fails: every problem is recorded on the returned item.
    pub async fn normalize(&self, item: RawItem) -> NormalizedItem {
        if item.text.trim().is_empty() {
            info!(url = %item.url, "normalize: empty text, skipping LLM");
            return NormalizedItem::degraded(item, NormalizeFailure::EmptyText);
        }

        let prompt = self.build_prompt(&item.text);
        let mut response = match self.call(prompt.clone()).await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %item.url, error = %e, "normalize: LLM call failed");
                return NormalizedItem::degraded(item, NormalizeFailure::Llm(format!("{:#}", e)));
            }
        };

        if !self.conforms(&response) {
            warn!(
                url = %item.url,
                language = %self.settings.target_language,
                "normalize: response not in target language, retrying once"
            );
            response = match self.call(prompt + &self.reinforcement()).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %item.url, error = %e, "normalize: reinforced LLM call failed");
                    return NormalizedItem::degraded(item, NormalizeFailure::Llm(format!("{:#}", e)));
                }
            };
        }

        match parse_response(&response) {
            Some((summary, event_type, sentiment)) => {
                info!(url = %item.url, %event_type, %sentiment, "normalize: item processed");
                NormalizedItem::processed(item, summary, event_type, sentiment)
            }
            None => {
                warn!(url = %item.url, "normalize: no parseable JSON in response");
                NormalizedItem::degraded(item, NormalizeFailure::InvalidJson)
            }
        }
    }
}

/// Reads summary, event type and sentiment out of the model's reply.
pub fn parse_response(response: &str) -> Option<(String, EventType, Sentiment)> {
    let json = extract_json_object(response)?;
    let object: Map<String, Value> = serde_json::from_str(json).ok()?;

    Some((
        str_field(&object, "summary").trim().to_string(),
        EventType::from_label(str_field(&object, "event_type")),
        Sentiment::from_label(str_field(&object, "sentiment")),
    ))
}

fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// What happened to one raw item after normalize-and-persist
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Stored(PersistedRecord),
    Duplicate(String),
    Failed { url: String, error: String },
}

/// Normalize-and-persist job runner. Jobs share a bounded number of permits.
pub struct ItemPipeline {
    normalizer: Arc<Normalizer>,
    store: Arc<dyn RecordStore>,
    events: EventBus,
    permits: Arc<Semaphore>,
}

impl ItemPipeline {
    pub fn new(normalizer: Arc<Normalizer>, store: Arc<dyn RecordStore>, events: EventBus, concurrency: usize) -> Self {
        Self {
            normalizer,
            store,
            events,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Spawns an independent job for the item. Dropping the handle does not cancel it.
    pub fn submit(self: &Arc<Self>, item: RawItem) -> JoinHandle<ItemOutcome> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.process(item).await })
    }

    pub async fn process(&self, item: RawItem) -> ItemOutcome {
        let url = item.url.clone();
        let _permit = match self.permits.acquire().await {
            Ok(p) => p,
            Err(e) => {
                return ItemOutcome::Failed {
                    url,
                    error: e.to_string(),
                }
            }
        };

        let normalized = self.normalizer.normalize(item).await;
        match persist(self.store.as_ref(), &normalized).await {
            Ok(PersistOutcome::Stored(record)) => {
                self.events.publish(StoredEvent::from_record(&record));
                ItemOutcome::Stored(record)
            }
            Ok(PersistOutcome::Duplicate(canonical)) => ItemOutcome::Duplicate(canonical),
            Err(e) => {
                error!(%url, error = %e, "pipeline: failed to persist item");
                ItemOutcome::Failed {
                    url,
                    error: format!("{:#}", e),
                }
            }
        }
    }
}
