use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::metrics::Metrics;
use crate::models::{OutboxEntry, OutboxEntryType};
use crate::publisher::EventPublisher;
use crate::store::{EventStatusUpdater, OutboxRepository, WebhookProvider};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const BATCH_LIMIT: i64 = 10;
const BACKOFF_STEP_SECS: i64 = 5;
const ABANDON_DEADLINE: ChronoDuration = ChronoDuration::hours(24);

/// Linear backoff, per the original service's formula:
/// `next_attempt_at = now + (attempts_after_this_failure) * 5s`.
/// Deliberately linear, not exponential — the corpus's outbox libraries
/// use exponential backoff, but this service's retry schedule is
/// specified as a fixed 5-second step to amortize transient outages
/// within the 24h deadline without stampeding on recovery.
fn next_attempt_after_failure(attempts_after: i32) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::seconds(BACKOFF_STEP_SECS * attempts_after as i64)
}

fn is_past_deadline(entry: &OutboxEntry) -> bool {
    Utc::now() - entry.created_at > ABANDON_DEADLINE
}

/// Single long-running loop draining due outbox entries on a fixed
/// interval. A failure on one entry never stops the batch.
pub struct OutboxWorker<S, P, D>
where
    S: OutboxRepository + EventStatusUpdater + WebhookProvider,
    P: EventPublisher,
    D: Dispatcher,
{
    store: Arc<S>,
    publisher: Arc<P>,
    dispatcher: Arc<D>,
    metrics: Metrics,
}

impl<S, P, D> OutboxWorker<S, P, D>
where
    S: OutboxRepository + EventStatusUpdater + WebhookProvider,
    P: EventPublisher,
    D: Dispatcher,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>, dispatcher: Arc<D>, metrics: Metrics) -> Self {
        Self {
            store,
            publisher,
            dispatcher,
            metrics,
        }
    }

    pub async fn run(&self, shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut shutdown = shutdown;
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_tick().await {
                        tracing::error!(error = %e, "outbox tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("outbox worker stopped");
                        return;
                    }
                }
            }
        }
    }

    async fn process_tick(&self) -> crate::error::Result<()> {
        let entries = self.store.get_due_outbox_entries(BATCH_LIMIT).await?;
        self.metrics.outbox_pending.set(entries.len() as i64);
        if let Some(oldest) = entries.iter().min_by_key(|e| e.created_at) {
            let age = (Utc::now() - oldest.created_at).num_seconds().max(0);
            self.metrics.outbox_oldest_pending_age_seconds.set(age);
        }

        for entry in entries {
            if let Err(e) = self.process_entry(entry).await {
                tracing::error!(error = %e, "failed to process outbox entry");
            }
        }
        Ok(())
    }

    async fn process_entry(&self, entry: OutboxEntry) -> crate::error::Result<()> {
        if is_past_deadline(&entry) {
            tracing::warn!(outbox_id = entry.id, event_id = entry.event_id, "abandoning outbox entry past 24h deadline");
            self.store
                .update_event_status(entry.event_id, crate::models::EventStatus::Failed)
                .await?;
            self.store.delete_outbox_entry(entry.id).await?;
            self.metrics
                .outbox_processed_total
                .with_label_values(&["abandoned"])
                .inc();
            return Ok(());
        }

        let outcome = match entry.entry_type {
            OutboxEntryType::Publish => self.process_publish(&entry).await,
            OutboxEntryType::Delivery => self.process_delivery(&entry).await,
        };

        match outcome {
            Ok(()) => {
                self.store.delete_outbox_entry(entry.id).await?;
                self.metrics
                    .outbox_processed_total
                    .with_label_values(&["success"])
                    .inc();
            }
            Err(e) => {
                tracing::warn!(outbox_id = entry.id, error = %e, "outbox entry attempt failed, scheduling retry");
                let attempts_after = entry.attempts + 1;
                let next_attempt_at = next_attempt_after_failure(attempts_after);
                self.store
                    .update_outbox_entry(entry.id, attempts_after, next_attempt_at)
                    .await?;
                self.metrics
                    .outbox_processed_total
                    .with_label_values(&["retry"])
                    .inc();
            }
        }
        Ok(())
    }

    async fn process_publish(&self, entry: &OutboxEntry) -> crate::error::Result<()> {
        let raw = crate::models::RawEvent::new(
            entry.event_id,
            entry.webhook_id,
            entry.payload.clone(),
            crate::models::EventStatus::Pending,
        );
        self.publisher.publish_event(&raw).await
    }

    async fn process_delivery(&self, entry: &OutboxEntry) -> crate::error::Result<()> {
        let webhook = self.store.get_webhook(entry.webhook_id).await?;
        self.dispatcher
            .dispatch(&webhook, &entry.payload)
            .await?;
        self.store
            .update_event_status(entry.event_id, crate::models::EventStatus::Delivered)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_progression() {
        let base = Utc::now();
        for attempts_after in 1..=5 {
            let next = next_attempt_after_failure(attempts_after);
            let expected_secs = BACKOFF_STEP_SECS * attempts_after as i64;
            let delta = (next - base).num_seconds();
            assert!(
                (delta - expected_secs).abs() <= 1,
                "attempt {attempts_after}: expected ~{expected_secs}s, got {delta}s"
            );
        }
    }

    #[test]
    fn deadline_check_respects_24h_boundary() {
        let fresh = OutboxEntry {
            id: 1,
            entry_type: OutboxEntryType::Publish,
            event_id: 1,
            webhook_id: 1,
            payload: "{}".into(),
            attempts: 0,
            next_attempt_at: Utc::now(),
            created_at: Utc::now(),
        };
        assert!(!is_past_deadline(&fresh));

        let stale = OutboxEntry {
            created_at: Utc::now() - ChronoDuration::hours(25),
            ..fresh
        };
        assert!(is_past_deadline(&stale));
    }

    use crate::error::{AppError, Result as AppResult};
    use crate::models::Webhook;
    use crate::publisher::EventPublisher;
    use crate::store::{EventStatusUpdater, OutboxRepository, WebhookProvider};
    use std::sync::Mutex;

    struct FakeStore {
        entries: Mutex<Vec<OutboxEntry>>,
        statuses: Mutex<std::collections::HashMap<i64, crate::models::EventStatus>>,
    }

    #[async_trait::async_trait]
    impl WebhookProvider for FakeStore {
        async fn get_webhook(&self, id: i64) -> AppResult<Webhook> {
            Ok(Webhook {
                id,
                url: "https://example.com".into(),
                secret: "s".into(),
            })
        }
    }

    #[async_trait::async_trait]
    impl EventStatusUpdater for FakeStore {
        async fn update_event_status(
            &self,
            event_id: i64,
            status: crate::models::EventStatus,
        ) -> AppResult<()> {
            self.statuses.lock().unwrap().insert(event_id, status);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl OutboxRepository for FakeStore {
        async fn get_due_outbox_entries(&self, _limit: i64) -> AppResult<Vec<OutboxEntry>> {
            Ok(self.entries.lock().unwrap().clone())
        }
        async fn update_outbox_entry(
            &self,
            id: i64,
            attempts: i32,
            next_attempt_at: DateTime<Utc>,
        ) -> AppResult<()> {
            let mut entries = self.entries.lock().unwrap();
            if let Some(e) = entries.iter_mut().find(|e| e.id == id) {
                e.attempts = attempts;
                e.next_attempt_at = next_attempt_at;
            }
            Ok(())
        }
        async fn delete_outbox_entry(&self, id: i64) -> AppResult<()> {
            self.entries.lock().unwrap().retain(|e| e.id != id);
            Ok(())
        }
        async fn create_delivery_entry(
            &self,
            _event_id: i64,
            _webhook_id: i64,
            _payload: &str,
        ) -> AppResult<()> {
            Ok(())
        }
    }

    struct FlakyPublisher {
        remaining_failures: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl EventPublisher for FlakyPublisher {
        async fn publish_event(&self, _event: &crate::models::RawEvent) -> AppResult<()> {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Err(AppError::Transient("target down".into()))
            } else {
                Ok(())
            }
        }
    }

    struct NoopDispatcher;

    #[async_trait::async_trait]
    impl crate::dispatcher::Dispatcher for NoopDispatcher {
        async fn dispatch(&self, _webhook: &Webhook, _payload: &str) -> AppResult<()> {
            Ok(())
        }
        async fn handle_event(&self, _event: &crate::models::Event) -> AppResult<()> {
            Ok(())
        }
    }

    fn make_entry(id: i64) -> OutboxEntry {
        OutboxEntry {
            id,
            entry_type: OutboxEntryType::Publish,
            event_id: id,
            webhook_id: 1,
            payload: "{}".into(),
            attempts: 0,
            next_attempt_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn retry_then_succeed_schedules_linear_backoff_then_clears() {
        let store = Arc::new(FakeStore {
            entries: Mutex::new(vec![make_entry(1)]),
            statuses: Mutex::new(Default::default()),
        });
        let publisher = Arc::new(FlakyPublisher {
            remaining_failures: Mutex::new(2),
        });
        let dispatcher = Arc::new(NoopDispatcher);
        let worker = OutboxWorker::new(
            store.clone(),
            publisher,
            dispatcher,
            Metrics::new(&prometheus::Registry::new()),
        );

        // First attempt fails: attempts becomes 1, next_attempt_at ~5s out.
        let entry = store.entries.lock().unwrap()[0].clone();
        worker.process_entry(entry).await.unwrap();
        {
            let entries = store.entries.lock().unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].attempts, 1);
            let delta = (entries[0].next_attempt_at - Utc::now()).num_seconds();
            assert!((delta - 5).abs() <= 1);
        }

        // Second attempt fails: attempts becomes 2.
        let entry = store.entries.lock().unwrap()[0].clone();
        worker.process_entry(entry).await.unwrap();
        assert_eq!(store.entries.lock().unwrap()[0].attempts, 2);

        // Third attempt succeeds: entry is deleted.
        let entry = store.entries.lock().unwrap()[0].clone();
        worker.process_entry(entry).await.unwrap();
        assert!(store.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_past_deadline_is_abandoned_and_event_marked_failed() {
        let mut stale_entry = make_entry(7);
        stale_entry.created_at = Utc::now() - ChronoDuration::hours(25);

        let store = Arc::new(FakeStore {
            entries: Mutex::new(vec![stale_entry.clone()]),
            statuses: Mutex::new(Default::default()),
        });
        let publisher = Arc::new(FlakyPublisher {
            remaining_failures: Mutex::new(0),
        });
        let dispatcher = Arc::new(NoopDispatcher);
        let worker = OutboxWorker::new(
            store.clone(),
            publisher,
            dispatcher,
            Metrics::new(&prometheus::Registry::new()),
        );

        worker.process_entry(stale_entry).await.unwrap();

        assert!(store.entries.lock().unwrap().is_empty());
        assert_eq!(
            store.statuses.lock().unwrap().get(&7).copied(),
            Some(crate::models::EventStatus::Failed)
        );
    }
}
