use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use newswatch::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use newswatch::model::{EventType, ItemExtras, NormalizeFailure, RawItem, Sentiment, Source};
use newswatch::processing::{Normalizer, NormalizerSettings};

/// Replies from a script, one entry per call. `Err` entries simulate endpoint failures.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt);
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()));
        match next {
            Ok(content) => Ok(LlmResponse {
                content,
                usage: UsageMetadata::default(),
                model: "scripted".to_string(),
            }),
            Err(e) => Err(anyhow::anyhow!(e)),
        }
    }

    async fn health(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn item(text: &str) -> RawItem {
    RawItem {
        source: Source::Web,
        company: "Apple".to_string(),
        title: "Apple ships new iPhone".to_string(),
        text: text.to_string(),
        url: "https://www.apple.com/newsroom/2026/01/iphone/".to_string(),
        published_at: None,
        extras: ItemExtras::default(),
    }
}

const RUSSIAN_REPLY: &str = r#"{"summary": "Apple выпустила новый iPhone с улучшенной камерой и более мощным процессором.", "event_type": "press-release", "sentiment": "positive"}"#;
const ENGLISH_REPLY: &str = r#"{"summary": "Apple released a new iPhone with a better camera.", "event_type": "news", "sentiment": "positive"}"#;

#[tokio::test]
async fn empty_text_skips_the_model() {
    let llm = ScriptedLlm::new(vec![Ok(RUSSIAN_REPLY)]);
    let normalizer = Normalizer::new(llm.clone(), NormalizerSettings::default());

    let out = normalizer.normalize(item("   \n ")).await;

    assert!(!out.processed);
    assert_eq!(out.failure, Some(NormalizeFailure::EmptyText));
    assert_eq!(out.failure.as_ref().map(|f| f.to_string()).as_deref(), Some("empty_text"));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn conforming_reply_is_accepted_in_one_call() {
    let llm = ScriptedLlm::new(vec![Ok(RUSSIAN_REPLY)]);
    let normalizer = Normalizer::new(llm.clone(), NormalizerSettings::default());

    let out = normalizer.normalize(item("Apple announced a new iPhone today.")).await;

    assert!(out.processed);
    assert_eq!(out.event_type, EventType::PressRelease);
    assert_eq!(out.sentiment, Sentiment::Positive);
    assert!(out.summary.starts_with("Apple выпустила"));
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn wrong_language_triggers_exactly_one_reinforced_retry() {
    let llm = ScriptedLlm::new(vec![Ok(ENGLISH_REPLY), Ok(ENGLISH_REPLY), Ok(RUSSIAN_REPLY)]);
    let normalizer = Normalizer::new(llm.clone(), NormalizerSettings::default());

    let out = normalizer.normalize(item("Apple announced a new iPhone today.")).await;

    // the second reply is accepted even though it still fails the gate
    assert_eq!(llm.calls(), 2);
    assert!(out.processed);
    assert_eq!(out.summary, "Apple released a new iPhone with a better camera.");

    let prompts = llm.prompts.lock().unwrap();
    assert!(!prompts[0].contains("REPEAT THE ANSWER IN RUSSIAN"));
    assert!(prompts[1].ends_with(&normalizer.reinforcement()));
}

#[tokio::test]
async fn unparseable_reply_is_degraded() {
    let llm = ScriptedLlm::new(vec![Ok("Извините, я не могу ответить на этот вопрос.")]);
    let normalizer = Normalizer::new(llm.clone(), NormalizerSettings::default());

    let out = normalizer.normalize(item("Apple announced a new iPhone today.")).await;

    assert!(!out.processed);
    assert_eq!(out.failure, Some(NormalizeFailure::InvalidJson));
    assert_eq!(out.item.title, "Apple ships new iPhone");
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn endpoint_failure_is_captured() {
    let llm = ScriptedLlm::new(vec![Err("connection refused")]);
    let normalizer = Normalizer::new(llm.clone(), NormalizerSettings::default());

    let out = normalizer.normalize(item("Apple announced a new iPhone today.")).await;

    assert!(!out.processed);
    match out.failure {
        Some(NormalizeFailure::Llm(message)) => assert!(message.contains("connection refused")),
        other => panic!("unexpected failure: {:?}", other),
    }
    assert_eq!(out.event_type, EventType::Unknown);
    assert_eq!(out.sentiment, Sentiment::Neutral);
}

#[tokio::test]
async fn prompt_is_truncated_and_names_the_vocabulary() {
    let llm = ScriptedLlm::new(vec![Ok(RUSSIAN_REPLY)]);
    let settings = NormalizerSettings {
        max_prompt_chars: 50,
        ..NormalizerSettings::default()
    };
    let normalizer = Normalizer::new(llm.clone(), settings);

    let long_text = "x".repeat(500);
    normalizer.normalize(item(&long_text)).await;

    let prompts = llm.prompts.lock().unwrap();
    assert!(prompts[0].contains(&"x".repeat(50)));
    assert!(!prompts[0].contains(&"x".repeat(51)));
    assert!(prompts[0].contains("press-release"));
    assert!(prompts[0].contains("Russian"));
}
