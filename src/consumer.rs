use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::error::{AppError, Result};
use crate::models::{Event, RawEvent};

const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// N workers sharing one consumer-group id against one topic. Partition
/// assignment across workers is driven by the group protocol, not by
/// this pool. `run` returns as soon as any worker returns an error or the
/// shutdown signal fires; `close` drops all readers.
pub struct ConsumerPool<D: Dispatcher + 'static> {
    brokers: String,
    topic: String,
    group_id: String,
    worker_count: usize,
    dispatcher: Arc<D>,
}

impl<D: Dispatcher + 'static> ConsumerPool<D> {
    pub fn new(
        brokers: String,
        topic: String,
        group_id: String,
        worker_count: usize,
        dispatcher: Arc<D>,
    ) -> Self {
        Self {
            brokers,
            topic,
            group_id,
            worker_count,
            dispatcher,
        }
    }

    fn build_consumer(&self) -> Result<StreamConsumer> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| AppError::Fatal(format!("failed to create Kafka consumer: {e}")))
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mut handles = Vec::with_capacity(self.worker_count);

        for worker_id in 0..self.worker_count {
            let consumer = self.build_consumer()?;
            consumer
                .subscribe(&[&self.topic])
                .map_err(|e| AppError::Fatal(format!("failed to subscribe to topic: {e}")))?;

            let dispatcher = self.dispatcher.clone();
            let mut worker_shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, consumer, dispatcher, &mut worker_shutdown).await
            }));
        }

        tokio::select! {
            (result, _, _) = futures::future::select_all(handles) => {
                match result {
                    Ok(worker_result) => worker_result,
                    Err(join_err) => Err(AppError::Fatal(format!("consumer worker panicked: {join_err}"))),
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("consumer pool shutdown requested");
                Ok(())
            }
        }
    }
}

async fn worker_loop<D: Dispatcher>(
    worker_id: usize,
    consumer: StreamConsumer,
    dispatcher: Arc<D>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(worker_id, "consumer worker stopped");
                    return Ok(());
                }
            }
            recv_result = consumer.recv() => {
                match recv_result {
                    Err(e) => {
                        tracing::error!(worker_id, error = %e, "failed to fetch message, backing off");
                        tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                    }
                    Ok(message) => {
                        let payload = match rdkafka::Message::payload(&message) {
                            Some(p) => p,
                            None => {
                                tracing::warn!(worker_id, "message with empty payload, committing and skipping");
                                commit(&consumer, &message, worker_id);
                                continue;
                            }
                        };

                        let raw: RawEvent = match serde_json::from_slice(payload) {
                            Ok(raw) => raw,
                            Err(e) => {
                                tracing::warn!(worker_id, error = %e, "undecodable message, committing and skipping (poison pill)");
                                commit(&consumer, &message, worker_id);
                                continue;
                            }
                        };

                        let event = Event {
                            id: raw.id,
                            webhook_id: raw.webhook_id,
                            payload: raw.payload,
                            status: raw.status,
                        };

                        match dispatcher.handle_event(&event).await {
                            Ok(()) => commit(&consumer, &message, worker_id),
                            Err(e) => {
                                tracing::warn!(worker_id, event_id = event.id, error = %e, "dispatch failed, not committing");
                            }
                        }
                    }
                }
            }
        }
    }
}

fn commit(consumer: &StreamConsumer, message: &rdkafka::message::BorrowedMessage<'_>, worker_id: usize) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        tracing::error!(worker_id, error = %e, "failed to commit offset");
    }
}
