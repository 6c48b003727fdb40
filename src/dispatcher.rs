use async_trait::async_trait;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::models::{Event, EventStatus, Webhook};
use crate::store::{EventStatusUpdater, OutboxRepository, WebhookProvider};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP delivery. `dispatch` performs the bare POST (used by the outbox
/// worker for `delivery`-type entries, which own their own retry/backoff
/// bookkeeping). `handle_event` is the full consumer-facing flow: load
/// webhook, POST, and drive the event's durable status.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, webhook: &Webhook, payload: &str) -> Result<()>;
    async fn handle_event(&self, event: &Event) -> Result<()>;
}

pub struct HttpDispatcher<S>
where
    S: WebhookProvider + EventStatusUpdater + OutboxRepository,
{
    client: reqwest::Client,
    store: std::sync::Arc<S>,
    metrics: Metrics,
}

impl<S> HttpDispatcher<S>
where
    S: WebhookProvider + EventStatusUpdater + OutboxRepository,
{
    pub fn new(store: std::sync::Arc<S>, metrics: Metrics) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            store,
            metrics,
        }
    }
}

#[async_trait]
impl<S> Dispatcher for HttpDispatcher<S>
where
    S: WebhookProvider + EventStatusUpdater + OutboxRepository,
{
    async fn dispatch(&self, webhook: &Webhook, payload: &str) -> Result<()> {
        let mut request = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json");
        if !webhook.secret.is_empty() {
            request = request.header("X-Secret", &webhook.secret);
        }

        let response = request
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| AppError::Transient(e.to_string()))?;

        let status = response.status();
        // Always drain and close the response body, success or failure.
        let _ = response.bytes().await;

        if status.is_success() {
            self.metrics
                .dispatch_total
                .with_label_values(&["success"])
                .inc();
            Ok(())
        } else {
            self.metrics
                .dispatch_total
                .with_label_values(&["failure"])
                .inc();
            Err(AppError::Transient(format!(
                "received non-2xx response: {status}"
            )))
        }
    }

    /// Invoked from the consumer path. On success the event is marked
    /// delivered. On failure a `delivery`-type outbox entry is created so
    /// the outbox worker drives bounded retry/backoff/deadline, and an
    /// error is returned so the consumer does not commit its offset —
    /// both retry paths are harmless given target idempotency.
    async fn handle_event(&self, event: &Event) -> Result<()> {
        tracing::info!(event_id = event.id, webhook_id = event.webhook_id, "handling event");

        let webhook = self.store.get_webhook(event.webhook_id).await?;

        match self.dispatch(&webhook, &event.payload).await {
            Ok(()) => {
                self.store
                    .update_event_status(event.id, EventStatus::Delivered)
                    .await?;
                tracing::info!(event_id = event.id, "event handled successfully");
                Ok(())
            }
            Err(e) => {
                self.store
                    .create_delivery_entry(event.id, event.webhook_id, &event.payload)
                    .await?;
                Err(e)
            }
        }
    }
}
