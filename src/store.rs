use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::{AppError, Result};
use crate::models::{EventStatus, OutboxEntry, Webhook};

/// Read access to webhook rows. Narrow capability trait so the Dispatcher
/// and Registration service can be tested against small fakes instead of
/// the full Store.
#[async_trait]
pub trait WebhookProvider: Send + Sync {
    async fn get_webhook(&self, id: i64) -> Result<Webhook>;
}

/// Forward-only event status transitions.
#[async_trait]
pub trait EventStatusUpdater: Send + Sync {
    async fn update_event_status(&self, event_id: i64, status: EventStatus) -> Result<()>;
}

/// Outbox draining and bookkeeping, shared by the outbox worker and the
/// Dispatcher (for creating delivery-intent retries on dispatch failure).
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn get_due_outbox_entries(&self, limit: i64) -> Result<Vec<OutboxEntry>>;
    async fn update_outbox_entry(
        &self,
        id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn delete_outbox_entry(&self, id: i64) -> Result<()>;
    async fn create_delivery_entry(
        &self,
        event_id: i64,
        webhook_id: i64,
        payload: &str,
    ) -> Result<()>;
}

/// Durable state for webhooks, events and outbox entries. The only
/// component holding a database connection pool; every operation accepts
/// the ambient request scope and honors cancellation via the pool's own
/// acquire timeout.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save_webhook(&self, url: &str, secret: &str) -> Result<i64> {
        let row = sqlx::query("INSERT INTO webhooks(url, secret) VALUES ($1, $2) RETURNING id")
            .bind(url)
            .bind(secret)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    /// Inserts the pending `Event` and its `publish`-type `OutboxEntry` in
    /// a single transaction: either both are visible, or neither is. This
    /// is the linchpin invariant of the ingest path.
    pub async fn save_event_with_outbox(&self, webhook_id: i64, payload: &str) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let event_row = sqlx::query(
            "INSERT INTO events(webhook_id, payload, status) VALUES ($1, $2, 'pending') RETURNING id",
        )
        .bind(webhook_id)
        .bind(payload)
        .fetch_one(&mut *tx)
        .await?;
        let event_id: i64 = event_row.try_get("id")?;

        sqlx::query(
            "INSERT INTO outbox(type, event_id, webhook_id, payload, attempts, next_attempt_at) \
             VALUES ('publish', $1, $2, $3, 0, now())",
        )
        .bind(event_id)
        .bind(webhook_id)
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(event_id)
    }

    pub async fn get_due_outbox_entries_impl(&self, limit: i64) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxEntry>(
            "SELECT id, type, event_id, webhook_id, payload, attempts, next_attempt_at, created_at \
             FROM outbox WHERE next_attempt_at <= now() ORDER BY next_attempt_at ASC, id ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl WebhookProvider for Store {
    async fn get_webhook(&self, id: i64) -> Result<Webhook> {
        let row = sqlx::query("SELECT id, url, secret FROM webhooks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Webhook {
                id: row.try_get("id")?,
                url: row.try_get("url")?,
                secret: row.try_get("secret")?,
            }),
            None => Err(AppError::WebhookNotFound(id)),
        }
    }
}

#[async_trait]
impl EventStatusUpdater for Store {
    /// Idempotent, forward-only: a terminal event (already `delivered` or
    /// `failed`) is left untouched rather than erroring, since retries may
    /// race a commit that already landed.
    async fn update_event_status(&self, event_id: i64, status: EventStatus) -> Result<()> {
        sqlx::query(
            "UPDATE events SET status = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(event_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for Store {
    async fn get_due_outbox_entries(&self, limit: i64) -> Result<Vec<OutboxEntry>> {
        self.get_due_outbox_entries_impl(limit).await
    }

    async fn update_outbox_entry(
        &self,
        id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE outbox SET attempts = $2, next_attempt_at = $3 WHERE id = $1")
            .bind(id)
            .bind(attempts)
            .bind(next_attempt_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_outbox_entry(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM outbox WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_delivery_entry(
        &self,
        event_id: i64,
        webhook_id: i64,
        payload: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO outbox(type, event_id, webhook_id, payload, attempts, next_attempt_at) \
             VALUES ('delivery', $1, $2, $3, 0, now() + interval '5 seconds')",
        )
        .bind(event_id)
        .bind(webhook_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

