use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered delivery target. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub url: String,
    pub secret: String,
}

/// Lifecycle state of an `Event`. Transitions are forward-only:
/// `Pending -> Delivered` or `Pending -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub webhook_id: i64,
    pub payload: String,
    pub status: EventStatus,
}

/// Kind of outbox intent. `Publish` moves an event onto the bus;
/// `Delivery` drives an HTTP POST directly from the outbox worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_entry_type", rename_all = "lowercase")]
pub enum OutboxEntryType {
    Publish,
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEntry {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub entry_type: OutboxEntryType,
    pub event_id: i64,
    pub webhook_id: i64,
    pub payload: String,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Wire representation of an event as it travels on the bus.
///
/// Accepts the legacy `hook_id` field as an alias for `webhook_id`: if
/// `webhook_id` decodes as zero and `hook_id` is non-zero, the latter is
/// adopted. Encoding always uses `webhook_id` — this is intentionally not
/// round-trip symmetric for legacy-shaped input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub id: i64,
    pub webhook_id: i64,
    pub payload: String,
    pub status: EventStatus,
}

impl RawEvent {
    pub fn new(id: i64, webhook_id: i64, payload: String, status: EventStatus) -> Self {
        Self {
            id,
            webhook_id,
            payload,
            status,
        }
    }
}

impl<'de> Deserialize<'de> for RawEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            id: i64,
            #[serde(default)]
            webhook_id: i64,
            #[serde(default)]
            hook_id: i64,
            payload: String,
            status: EventStatus,
        }

        let wire = Wire::deserialize(deserializer)?;
        let webhook_id = if wire.webhook_id == 0 && wire.hook_id != 0 {
            wire.hook_id
        } else {
            wire.webhook_id
        };

        Ok(RawEvent {
            id: wire.id,
            webhook_id,
            payload: wire.payload,
            status: wire.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_webhook_id_field() {
        let raw = r#"{"id":1,"webhook_id":42,"payload":"{}","status":"pending"}"#;
        let event: RawEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.webhook_id, 42);
    }

    #[test]
    fn decodes_legacy_hook_id_alias() {
        let raw = r#"{"id":1,"hook_id":42,"payload":"{}","status":"pending"}"#;
        let event: RawEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.webhook_id, 42);
    }

    #[test]
    fn prefers_webhook_id_when_both_present_and_nonzero() {
        let raw = r#"{"id":1,"webhook_id":7,"hook_id":42,"payload":"{}","status":"pending"}"#;
        let event: RawEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.webhook_id, 7);
    }

    #[test]
    fn decoding_with_either_field_yields_same_event() {
        let by_webhook_id: RawEvent =
            serde_json::from_str(r#"{"id":5,"webhook_id":9,"payload":"p","status":"pending"}"#)
                .unwrap();
        let by_hook_id: RawEvent =
            serde_json::from_str(r#"{"id":5,"hook_id":9,"payload":"p","status":"pending"}"#)
                .unwrap();
        assert_eq!(by_webhook_id, by_hook_id);
    }
}
