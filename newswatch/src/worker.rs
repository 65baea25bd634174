use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::SubscriptionConfig;
use std::sync::Arc;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::app::App;
use crate::error::MonitoringError;
use crate::model::{parse_sources, MonitoringRequest};
use crate::processing::ItemOutcome;

const DEFAULT_INTERVAL_HOURS: u64 = 6;
const TICK: Duration = Duration::from_secs(60);

/// Turns a configured subscription into a monitoring request.
/// Without an explicit source list, web and channel are enabled, plus forum when
/// communities are configured.
pub fn build_request(sub: &SubscriptionConfig, since: Option<DateTime<Utc>>) -> Result<MonitoringRequest, MonitoringError> {
    let sources = parse_sources(sub.sources.as_deref(), &sub.communities)?;

    MonitoringRequest::new(sub.company.clone())
        .with_sources(sources)
        .with_urls(sub.urls.iter().cloned())
        .with_channels(sub.channels.iter().cloned())
        .with_communities(sub.communities.iter().cloned())
        .with_since(since)
        .validate()
}

struct Schedule {
    sub: SubscriptionConfig,
    last_start: Option<DateTime<Utc>>,
    next_due: DateTime<Utc>,
}

/// Re-runs every subscription on its interval until `shutdown` is notified.
/// Each run only looks at items newer than the previous run's start.
pub async fn run_worker(app: App, subscriptions: Vec<SubscriptionConfig>, shutdown: Arc<Notify>) -> anyhow::Result<()> {
    info!(subscriptions = subscriptions.len(), "worker: scheduler starting");
    let now = Utc::now();
    let mut schedules: Vec<Schedule> = subscriptions
        .into_iter()
        .map(|sub| Schedule {
            sub,
            last_start: None,
            next_due: now,
        })
        .collect();

    loop {
        let now = Utc::now();
        for schedule in schedules.iter_mut().filter(|s| s.next_due <= now) {
            let company = schedule.sub.company.clone();
            let interval = schedule.sub.interval_hours.unwrap_or(DEFAULT_INTERVAL_HOURS).max(1);
            schedule.next_due = now + ChronoDuration::hours(interval as i64);

            let request = match build_request(&schedule.sub, schedule.last_start) {
                Ok(r) => r,
                Err(e) => {
                    error!(%company, error = %e, "worker: invalid subscription");
                    continue;
                }
            };

            match app.orchestrator.run_monitoring(request) {
                Ok(handle) => {
                    schedule.last_start = Some(now);
                    info!(%company, workflow = %handle.id(), next_due = %schedule.next_due, "worker: monitoring run started");
                    tokio::spawn(async move {
                        match handle.wait().await {
                            Ok(report) => {
                                let outcomes = report.item_jobs.finish().await;
                                let stored = outcomes.iter().filter(|o| matches!(o, ItemOutcome::Stored(_))).count();
                                let duplicates = outcomes.iter().filter(|o| matches!(o, ItemOutcome::Duplicate(_))).count();
                                info!(
                                    company = %report.company,
                                    raw = report.total_raw_items,
                                    stored,
                                    duplicates,
                                    "worker: monitoring run complete"
                                );
                            }
                            Err(e) => warn!(error = %e, "worker: monitoring run did not complete"),
                        }
                    });
                }
                Err(e) => warn!(%company, error = %e, "worker: monitoring run not started"),
            }
        }

        select! {
            _ = tokio::time::sleep(TICK) => {},
            _ = shutdown.notified() => {
                info!("worker: shutdown requested, exiting loop");
                break;
            }
        }
    }

    info!("worker: cleanup complete");
    Ok(())
}
