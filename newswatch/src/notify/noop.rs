use async_trait::async_trait;

use super::NotificationSink;

/// Sink used when no notifier is configured.
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn deliver(&self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
