use anyhow::{Context, Result};
use common::Config;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use crate::events::EventBus;
use crate::llm::{create_provider, LlmProvider};
use crate::orchestrator::{Orchestrator, RetryPolicies};
use crate::processing::{ItemPipeline, Normalizer, NormalizerSettings};
use crate::sources::channel::{ChannelFetcher, TelegramPreviewProvider};
use crate::sources::forum::{ForumFetcher, ForumSettings};
use crate::sources::web::{WebFetcher, WebSettings};
use crate::sources::SourceFetcher;
use crate::storage::{RecordStore, SqliteRecordStore};

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_MAX_MESSAGES: usize = 20;

/// Everything the HTTP surface and the background worker share.
#[derive(Clone)]
pub struct App {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn RecordStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub events: EventBus,
}

impl App {
    /// Wires fetchers, the LLM provider, the record store and the item pipeline from config.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let llm = create_provider(&config.llm.clone().unwrap_or_default()).context("failed to create LLM provider")?;
        info!(model = llm.model(), "LLM provider initialized");

        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool));
        let fetchers = build_fetchers(config)?;
        Self::assemble(config, llm, store, fetchers)
    }

    /// Same wiring with caller-provided collaborators.
    pub fn assemble(
        config: &Config,
        llm: Arc<dyn LlmProvider>,
        store: Arc<dyn RecordStore>,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
    ) -> Result<Self> {
        let normalize = config.normalize();
        let settings = NormalizerSettings::from_config(&normalize)?;
        info!(
            language = %settings.target_language,
            script = ?settings.target_script,
            "normalizer configured"
        );

        let events = EventBus::default();
        let normalizer = Arc::new(Normalizer::new(Arc::clone(&llm), settings));
        let pipeline = Arc::new(ItemPipeline::new(
            normalizer,
            Arc::clone(&store),
            events.clone(),
            normalize.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            fetchers,
            RetryPolicies::from_config(&config.retry()),
            pipeline,
        ));

        Ok(Self {
            orchestrator,
            store,
            llm,
            events,
        })
    }
}

pub fn build_fetchers(config: &Config) -> Result<Vec<Arc<dyn SourceFetcher>>> {
    let sources = config.sources();

    let web = WebFetcher::new(WebSettings::from_config(&sources.web.unwrap_or_default()))?;

    let channel_cfg = sources.channel.unwrap_or_default();
    let session = Arc::new(Semaphore::new(channel_cfg.session_permits.unwrap_or(1).max(1)));
    let channel = ChannelFetcher::new(
        Arc::new(TelegramPreviewProvider::from_config(&channel_cfg)?),
        session,
        channel_cfg.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES),
    );

    let forum_settings = ForumSettings::from_config(&sources.forum.unwrap_or_default());
    info!(
        oauth = forum_settings.credentials.is_some(),
        "forum fetcher configured"
    );
    let forum = ForumFetcher::new(forum_settings)?;

    Ok(vec![Arc::new(web), Arc::new(channel), Arc::new(forum)])
}
