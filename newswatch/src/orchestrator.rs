//! Fan-out/fan-in monitoring workflow.
//!
//! One job per applicable source runs concurrently with bounded retry. Once every job
//! is terminal the items are flattened in job order and each one is handed to the item
//! pipeline as an independent normalize-and-persist job.

use anyhow::anyhow;
use common::{RetryConfig, RetrySection};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{FetchError, MonitoringError};
use crate::model::{MonitoringRequest, RawItem, Source};
use crate::processing::{ItemOutcome, ItemPipeline};
use crate::sources::SourceFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Pending,
    Fetching,
    Aggregating,
    Normalizing,
    Done,
    /// No applicable source; nothing was scheduled
    Failed,
    /// The outer workflow was cancelled through its handle
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Failed | WorkflowState::Cancelled)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Pending => "PENDING",
            WorkflowState::Fetching => "FETCHING",
            WorkflowState::Aggregating => "AGGREGATING",
            WorkflowState::Normalizing => "NORMALIZING",
            WorkflowState::Done => "DONE",
            WorkflowState::Failed => "FAILED",
            WorkflowState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Retries after the first attempt, with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn default_for(source: Source) -> Self {
        match source {
            Source::Web => Self {
                max_retries: 2,
                delay: Duration::from_secs(5),
            },
            Source::Channel => Self {
                max_retries: 1,
                delay: Duration::from_secs(5),
            },
            Source::Forum => Self {
                max_retries: 3,
                delay: Duration::from_secs(60),
            },
        }
    }

    fn with_overrides(self, cfg: Option<&RetryConfig>) -> Self {
        let Some(cfg) = cfg else { return self };
        Self {
            max_retries: cfg.max_retries.unwrap_or(self.max_retries),
            delay: cfg.delay_seconds.map(Duration::from_secs).unwrap_or(self.delay),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicies {
    policies: HashMap<Source, RetryPolicy>,
}

impl RetryPolicies {
    pub fn from_config(cfg: &RetrySection) -> Self {
        let policies = Source::ALL
            .iter()
            .map(|&source| {
                let overrides = match source {
                    Source::Web => cfg.web.as_ref(),
                    Source::Channel => cfg.channel.as_ref(),
                    Source::Forum => cfg.forum.as_ref(),
                };
                (source, RetryPolicy::default_for(source).with_overrides(overrides))
            })
            .collect();
        Self { policies }
    }

    /// Same policy for every source
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            policies: Source::ALL.iter().map(|&s| (s, policy)).collect(),
        }
    }

    pub fn get(&self, source: Source) -> RetryPolicy {
        self.policies
            .get(&source)
            .copied()
            .unwrap_or_else(|| RetryPolicy::default_for(source))
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self::from_config(&RetrySection::default())
    }
}

/// Terminal result of one source job
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: Source,
    pub items: usize,
    pub attempts: u32,
    /// Last error when the job degraded
    pub error: Option<String>,
}

struct SourceRun {
    items: Vec<RawItem>,
    attempts: u32,
    error: Option<String>,
}

/// Runs one fetcher until it succeeds or the policy is exhausted.
/// Exhaustion degrades to the last partial result instead of failing.
async fn fetch_with_retry(
    fetcher: &dyn SourceFetcher,
    company: &str,
    targets: &[String],
    since: Option<chrono::DateTime<chrono::Utc>>,
    policy: RetryPolicy,
) -> SourceRun {
    let source = fetcher.source();
    let mut partial: Vec<RawItem> = Vec::new();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match fetcher.fetch(company, targets, since).await {
            Ok(items) => {
                info!(%source, %company, attempt, count = items.len(), "orchestrator: source job finished");
                return SourceRun {
                    items,
                    attempts: attempt,
                    error: None,
                };
            }
            Err(e) => e,
        };

        let message = err.to_string();
        let wait = err.retry_after().unwrap_or(policy.delay);
        let retryable = !matches!(err, FetchError::Unauthorized { .. });
        let latest = err.into_partial();
        if !latest.is_empty() {
            partial = latest;
        }

        if !retryable || attempt > policy.max_retries {
            warn!(
                %source,
                %company,
                attempts = attempt,
                kept = partial.len(),
                error = %message,
                "orchestrator: source job degraded"
            );
            return SourceRun {
                items: partial,
                attempts: attempt,
                error: Some(message),
            };
        }

        warn!(%source, %company, attempt, ?wait, error = %message, "orchestrator: source job failed, retrying");
        tokio::time::sleep(wait).await;
    }
}

/// Handles of the submitted normalize-and-persist jobs
#[derive(Debug, Default)]
pub struct ItemJobs(Vec<JoinHandle<ItemOutcome>>);

impl ItemJobs {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Waits for every job. Panicked jobs are reported as failures.
    pub async fn finish(self) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(self.0.len());
        for handle in self.0 {
            outcomes.push(match handle.await {
                Ok(outcome) => outcome,
                Err(e) => ItemOutcome::Failed {
                    url: String::new(),
                    error: format!("item job did not complete: {}", e),
                },
            });
        }
        outcomes
    }
}

#[derive(Debug)]
pub struct WorkflowReport {
    pub id: Uuid,
    pub company: String,
    pub total_raw_items: usize,
    pub sources: Vec<SourceReport>,
    pub item_jobs: ItemJobs,
}

pub struct WorkflowHandle {
    id: Uuid,
    state: Arc<watch::Sender<WorkflowState>>,
    state_rx: watch::Receiver<WorkflowState>,
    task: JoinHandle<WorkflowReport>,
}

impl WorkflowHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WorkflowState {
        *self.state_rx.borrow()
    }

    /// Watch channel following the state machine
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state_rx.clone()
    }

    /// Stops the outer workflow. Item jobs already submitted keep running.
    pub fn cancel(&self) {
        self.task.abort();
        self.state.send_if_modified(|s| {
            if s.is_terminal() {
                false
            } else {
                *s = WorkflowState::Cancelled;
                true
            }
        });
    }

    pub async fn wait(self) -> anyhow::Result<WorkflowReport> {
        let id = self.id;
        self.task.await.map_err(|e| {
            if e.is_cancelled() {
                anyhow!("workflow {} was cancelled", id)
            } else {
                anyhow!("workflow {} panicked: {}", id, e)
            }
        })
    }
}

fn advance(state: &watch::Sender<WorkflowState>, next: WorkflowState) {
    state.send_if_modified(|s| {
        if s.is_terminal() {
            false
        } else {
            *s = next;
            true
        }
    });
}

pub struct Orchestrator {
    fetchers: HashMap<Source, Arc<dyn SourceFetcher>>,
    retry: RetryPolicies,
    pipeline: Arc<ItemPipeline>,
}

impl Orchestrator {
    pub fn new(fetchers: Vec<Arc<dyn SourceFetcher>>, retry: RetryPolicies, pipeline: Arc<ItemPipeline>) -> Self {
        let fetchers = fetchers.into_iter().map(|f| (f.source(), f)).collect();
        Self {
            fetchers,
            retry,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Arc<ItemPipeline> {
        &self.pipeline
    }

    /// Enabled sources with a registered fetcher and, for web and channel, at least one target.
    pub fn applicable_sources(&self, request: &MonitoringRequest) -> Vec<Source> {
        request
            .sources
            .iter()
            .copied()
            .filter(|s| self.fetchers.contains_key(s))
            .filter(|s| *s == Source::Forum || !request.targets_for(*s).is_empty())
            .collect()
    }

    /// Validates the request and starts the workflow. Fails without scheduling anything
    /// when the request is invalid or no source is applicable.
    pub fn run_monitoring(&self, request: MonitoringRequest) -> Result<WorkflowHandle, MonitoringError> {
        let request = request.validate()?;
        let applicable = self.applicable_sources(&request);
        if applicable.is_empty() {
            warn!(company = %request.company, "orchestrator: no applicable sources");
            return Err(MonitoringError::NoApplicableSources {
                company: request.company,
            });
        }

        let id = Uuid::new_v4();
        let (tx, state_rx) = watch::channel(WorkflowState::Pending);
        let state = Arc::new(tx);

        let jobs: Vec<(Source, Arc<dyn SourceFetcher>, Vec<String>, RetryPolicy)> = applicable
            .iter()
            .filter_map(|&source| {
                let fetcher = self.fetchers.get(&source)?.clone();
                Some((source, fetcher, request.targets_for(source), self.retry.get(source)))
            })
            .collect();

        info!(
            %id,
            company = %request.company,
            sources = ?applicable,
            since = ?request.since,
            "orchestrator: workflow started"
        );

        let pipeline = Arc::clone(&self.pipeline);
        let workflow_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            run_workflow(id, request, jobs, pipeline, workflow_state).await
        });

        Ok(WorkflowHandle {
            id,
            state,
            state_rx,
            task,
        })
    }
}

async fn run_workflow(
    id: Uuid,
    request: MonitoringRequest,
    jobs: Vec<(Source, Arc<dyn SourceFetcher>, Vec<String>, RetryPolicy)>,
    pipeline: Arc<ItemPipeline>,
    state: Arc<watch::Sender<WorkflowState>>,
) -> WorkflowReport {
    advance(&state, WorkflowState::Fetching);

    let job_sources: Vec<Source> = jobs.iter().map(|(s, ..)| *s).collect();
    let mut set = JoinSet::new();
    for (idx, (_, fetcher, targets, policy)) in jobs.into_iter().enumerate() {
        let company = request.company.clone();
        let since = request.since;
        set.spawn(async move {
            let run = fetch_with_retry(fetcher.as_ref(), &company, &targets, since, policy).await;
            (idx, run)
        });
    }

    // barrier: every source job reaches a terminal state
    advance(&state, WorkflowState::Aggregating);
    let mut runs: Vec<Option<SourceRun>> = job_sources.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, run)) => runs[idx] = Some(run),
            Err(e) => error!(%id, error = %e, "orchestrator: source job panicked"),
        }
    }

    let mut items = Vec::new();
    let mut sources = Vec::with_capacity(runs.len());
    for (source, run) in job_sources.into_iter().zip(runs) {
        let run = run.unwrap_or_else(|| SourceRun {
            items: Vec::new(),
            attempts: 0,
            error: Some("source job panicked".to_string()),
        });
        sources.push(SourceReport {
            source,
            items: run.items.len(),
            attempts: run.attempts,
            error: run.error,
        });
        items.extend(run.items);
    }
    let total_raw_items = items.len();
    info!(%id, company = %request.company, total_raw_items, "orchestrator: items aggregated");

    advance(&state, WorkflowState::Normalizing);
    let handles = items.into_iter().map(|item| pipeline.submit(item)).collect();

    advance(&state, WorkflowState::Done);
    info!(%id, company = %request.company, submitted = total_raw_items, "orchestrator: item jobs submitted");

    WorkflowReport {
        id,
        company: request.company,
        total_raw_items,
        sources,
        item_jobs: ItemJobs(handles),
    }
}
