use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, routes, State};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::Config;

use crate::app::App;
use crate::error::MonitoringError;
use crate::model::{flatten_targets, parse_sources, MonitoringRequest, PersistedRecord, TargetEntry};
use crate::orchestrator::WorkflowState;
use crate::processing::ItemOutcome;
use crate::sources::{suggest_sources, SourceSuggestion};

const DEFAULT_NEWS_LIMIT: i64 = 20;
const MAX_NEWS_LIMIT: i64 = 200;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub app: App,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    records: i64,
    subscriptions: usize,
    model: String,
}

#[get("/")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let records = match state.app.store.count().await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "status: failed to count records");
            -1
        }
    };

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        records,
        subscriptions: state.config.subscriptions.len(),
        model: state.app.llm.model().to_string(),
    })
}

/// Body of `POST /monitor`. Target lists may arrive nested; they are flattened here.
#[derive(Debug, Deserialize)]
pub struct MonitorBody {
    pub company: String,
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub urls: Vec<TargetEntry>,
    #[serde(default)]
    pub channels: Vec<TargetEntry>,
    #[serde(default)]
    pub communities: Vec<TargetEntry>,
    pub since: Option<DateTime<Utc>>,
}

/// Turns a client submission into a validated request. Without URLs and channels the
/// suggester fills both in.
pub fn monitor_request(body: MonitorBody) -> Result<MonitoringRequest, MonitoringError> {
    let mut urls = flatten_targets(body.urls);
    let mut channels = flatten_targets(body.channels);
    let communities = flatten_targets(body.communities);

    if urls.iter().all(|u| u.trim().is_empty()) && channels.iter().all(|c| c.trim().is_empty()) {
        let suggestion = suggest_sources(&body.company);
        info!(
            company = %body.company,
            urls = suggestion.urls.len(),
            channels = suggestion.channels.len(),
            "monitor: no targets given, using suggestions"
        );
        urls = suggestion.urls;
        channels = suggestion.channels;
    }

    let sources = parse_sources(body.sources.as_deref(), &communities)?;
    MonitoringRequest::new(body.company)
        .with_sources(sources)
        .with_urls(urls)
        .with_channels(channels)
        .with_communities(communities)
        .with_since(body.since)
        .validate()
}

#[derive(Serialize)]
struct MonitorAccepted {
    id: String,
    state: WorkflowState,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[post("/monitor", data = "<body>")]
async fn monitor(
    state: &State<AppState>,
    body: Json<MonitorBody>,
) -> Result<Json<MonitorAccepted>, (Status, Json<ErrorBody>)> {
    let unprocessable = |e: MonitoringError| {
        (
            Status::UnprocessableEntity,
            Json(ErrorBody { error: e.to_string() }),
        )
    };

    let request = monitor_request(body.into_inner()).map_err(unprocessable)?;
    let handle = state.app.orchestrator.run_monitoring(request).map_err(unprocessable)?;
    let accepted = MonitorAccepted {
        id: handle.id().to_string(),
        state: handle.state(),
    };

    tokio::spawn(async move {
        match handle.wait().await {
            Ok(report) => {
                let outcomes = report.item_jobs.finish().await;
                let stored = outcomes.iter().filter(|o| matches!(o, ItemOutcome::Stored(_))).count();
                info!(
                    id = %report.id,
                    company = %report.company,
                    raw = report.total_raw_items,
                    stored,
                    "monitor: workflow items finished"
                );
            }
            Err(e) => warn!(error = %e, "monitor: workflow did not complete"),
        }
    });

    Ok(Json(accepted))
}

#[get("/suggest?<company>")]
async fn suggest(company: &str) -> Json<SourceSuggestion> {
    Json(suggest_sources(company))
}

#[get("/news?<company>&<limit>")]
async fn news(
    state: &State<AppState>,
    company: Option<&str>,
    limit: Option<i64>,
) -> Result<Json<Vec<PersistedRecord>>, Status> {
    let limit = limit.unwrap_or(DEFAULT_NEWS_LIMIT).clamp(1, MAX_NEWS_LIMIT);
    let company = company.map(str::trim).filter(|c| !c.is_empty());
    state
        .app
        .store
        .recent(company, limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "news: failed to load records");
            Status::InternalServerError
        })
}

#[derive(Serialize)]
struct LlmHealth {
    status: &'static str,
    model: String,
    models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[get("/health/llm")]
async fn llm_health(state: &State<AppState>) -> (Status, Json<LlmHealth>) {
    let model = state.app.llm.model().to_string();
    match state.app.llm.health().await {
        Ok(models) => (
            Status::Ok,
            Json(LlmHealth {
                status: "ok",
                model,
                models,
                error: None,
            }),
        ),
        Err(e) => (
            Status::ServiceUnavailable,
            Json(LlmHealth {
                status: "unavailable",
                model,
                models: Vec::new(),
                error: Some(format!("{:#}", e)),
            }),
        ),
    }
}

/// Launch Rocket with the shared application wiring. Address and port come from `[server]`.
///
/// This function blocks until the Rocket server shuts down (it awaits `rocket.launch().await`)
/// and returns an error if Rocket fails to start.
pub async fn launch_rocket(app: App, config: Arc<Config>) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = config.server.as_ref() {
        if let Some(address) = server.address.as_deref() {
            fig = fig.merge(("address", address.to_string()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    let state = AppState {
        started_at: Utc::now(),
        config,
        app,
    };

    let rocket = rocket::custom(fig)
        .manage(state)
        .mount("/", routes![status, monitor, suggest, news, llm_health]);

    info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    info!("Rocket HTTP server has shut down");
    Ok(())
}
