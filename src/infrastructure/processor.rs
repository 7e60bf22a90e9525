use crate::domain::ports::EventProcessor;
use crate::domain::webhook::WebhookEvent;
use crate::error::Result;
use async_trait::async_trait;

/// Downstream processor that only logs what it would hand to a connector.
#[derive(Debug, Default, Clone)]
pub struct LoggingProcessor;

#[async_trait]
impl EventProcessor for LoggingProcessor {
    async fn process(&self, event: &WebhookEvent, payload: &[u8]) -> Result<()> {
        tracing::info!(
            event_id = %event.id,
            integration = %event.integration,
            category = %event.category,
            bytes = payload.len(),
            "event handed to downstream processor"
        );
        Ok(())
    }
}
