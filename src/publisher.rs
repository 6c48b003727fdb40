use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::RawEvent;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_event(&self, event: &RawEvent) -> Result<()>;
}

/// Writes events onto the bus, partition-keyed by webhook id so that all
/// events for a given webhook land on the same partition and are
/// processed in order by a single consumer worker. Requires
/// acknowledgement from all in-sync replicas; any failure (timeout,
/// network, broker) is transient and retried by the outbox worker.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str, topic: String) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", WRITE_TIMEOUT.as_millis().to_string())
            .set("request.timeout.ms", WRITE_TIMEOUT.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", "2147483647")
            .set("compression.type", "lz4")
            .create()
            .map_err(|e| AppError::Fatal(format!("failed to create Kafka producer: {e}")))?;

        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish_event(&self, event: &RawEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| AppError::Transient(format!("failed to serialize event: {e}")))?;
        let key = event.webhook_id.to_string();

        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        self.producer
            .send(record, WRITE_TIMEOUT)
            .await
            .map_err(|(e, _)| AppError::Transient(format!("failed to publish event: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;

    #[test]
    fn serializes_with_webhook_id_field() {
        let event = RawEvent::new(1, 42, "{\"a\":1}".into(), EventStatus::Pending);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"webhook_id\":42"));
        assert!(!json.contains("\"hook_id\""));
    }
}
