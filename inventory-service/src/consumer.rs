use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use rand::Rng;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use shared::{EventEnvelope, HOLD_EXPIRED, ORDER_CONFIRMED};
use tracing::{error, info, warn};

use crate::service::InventoryService;

pub const CONSUMER_GROUP: &str = "inventory-service";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Redeliveries after the first attempt before the message dead-letters.
    pub max_redeliveries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff * 2u32.saturating_pow(attempt.min(8));
        let jitter = rand::thread_rng().gen_range(0..=self.base_backoff.as_millis() as u64);
        exp + Duration::from_millis(jitter)
    }
}

/// What to do with a delivery once processing finished.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Effect applied, deduplicated, or recorded as a domain no-op.
    Handled,
    /// Event type this consumer is not bound to.
    Ignored,
    /// Poison or retries exhausted; goes to the DLQ, then ack.
    DeadLettered(String),
}

pub struct InventoryConsumer {
    service: Arc<InventoryService>,
    producer: FutureProducer,
    dlq_topic: String,
    retry: RetryPolicy,
}

impl InventoryConsumer {
    pub fn new(
        service: Arc<InventoryService>,
        producer: FutureProducer,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            producer,
            dlq_topic: shared::dlq_topic(CONSUMER_GROUP),
            retry,
        }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    let raw = m
                        .payload_view::<str>()
                        .and_then(|payload| payload.ok())
                        .unwrap_or("");

                    let disposition = self.process(raw).await;
                    if let Disposition::DeadLettered(reason) = &disposition {
                        warn!("Dead-lettering message: {}", reason);
                        if let Err(e) = self.publish_dead_letter(raw, reason).await {
                            // Offset stays uncommitted so the broker redelivers.
                            error!("Failed to publish to DLQ: {}", e);
                            continue;
                        }
                    }

                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    /// Per-message pipeline: parse, filter, apply with bounded retries.
    pub async fn process(&self, raw: &str) -> Disposition {
        let envelope: EventEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => return Disposition::DeadLettered(format!("malformed envelope: {e}")),
        };

        if !matches!(
            envelope.event_type.as_str(),
            ORDER_CONFIRMED | HOLD_EXPIRED
        ) {
            return Disposition::Ignored;
        }

        let mut attempt = 0;
        loop {
            match self.service.apply_event(&envelope).await {
                Ok(_) => return Disposition::Handled,
                Err(err) if err.is_transient() => {
                    if attempt >= self.retry.max_redeliveries {
                        return Disposition::DeadLettered(format!(
                            "retries exhausted for event {}: {err}",
                            envelope.event_id
                        ));
                    }
                    attempt += 1;
                    warn!(
                        "Transient failure on event {} (attempt {}): {}",
                        envelope.event_id, attempt, err
                    );
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(err) => {
                    return Disposition::DeadLettered(format!(
                        "permanent failure for event {}: {err}",
                        envelope.event_id
                    ))
                }
            }
        }
    }

    async fn publish_dead_letter(&self, raw: &str, reason: &str) -> Result<()> {
        let record = FutureRecord::to(&self.dlq_topic)
            .payload(raw)
            .key(CONSUMER_GROUP)
            .headers(OwnedHeaders::new().insert(Header {
                key: "dead_letter_reason",
                value: Some(reason),
            }));
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish dead letter: {}", e))?;
        info!("Dead-lettered message to {}", self.dlq_topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryInventoryStore;
    use crate::models::HoldStatus;
    use crate::store::{
        Availability, ConsumeOutcome, ConsumerEffect, HoldAccepted, HoldRequest, InventoryError,
        InventoryStore, OutboxEvent,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use rdkafka::config::ClientConfig;
    use shared::HoldExpired;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Fails the first `failures` consumer effects with a transient error.
    struct FlakyStore {
        inner: MemoryInventoryStore,
        failures: Mutex<u32>,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryInventoryStore::new(),
                failures: Mutex::new(failures),
            }
        }
    }

    #[async_trait]
    impl InventoryStore for FlakyStore {
        async fn upsert_item(
            &self,
            session_id: Uuid,
            ticket_type_id: Uuid,
            total_quantity: i32,
        ) -> Result<Availability, InventoryError> {
            self.inner
                .upsert_item(session_id, ticket_type_id, total_quantity)
                .await
        }

        async fn availability(
            &self,
            session_id: Uuid,
            ticket_type_id: Uuid,
        ) -> Result<Availability, InventoryError> {
            self.inner.availability(session_id, ticket_type_id).await
        }

        async fn hold(&self, request: HoldRequest) -> Result<HoldAccepted, InventoryError> {
            self.inner.hold(request).await
        }

        async fn release(&self, hold_id: Uuid) -> Result<(), InventoryError> {
            self.inner.release(hold_id).await
        }

        async fn commit(&self, hold_id: Uuid) -> Result<(), InventoryError> {
            self.inner.commit(hold_id).await
        }

        async fn apply_consumed(
            &self,
            event_id: Uuid,
            event_type: &str,
            effect: ConsumerEffect,
        ) -> Result<ConsumeOutcome, InventoryError> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(InventoryError::Unavailable("lock timeout".into()));
                }
            }
            self.inner.apply_consumed(event_id, event_type, effect).await
        }

        async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, InventoryError> {
            self.inner.unpublished_events(limit).await
        }

        async fn mark_published(&self, event_id: Uuid) -> Result<(), InventoryError> {
            self.inner.mark_published(event_id).await
        }
    }

    fn test_producer() -> FutureProducer {
        ClientConfig::new()
            .set("bootstrap.servers", "localhost:9092")
            .create()
            .expect("producer config")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_redeliveries: 3,
            base_backoff: Duration::from_millis(1),
        }
    }

    fn consumer_over(store: Arc<dyn InventoryStore>) -> InventoryConsumer {
        InventoryConsumer::new(
            Arc::new(InventoryService::new(store)),
            test_producer(),
            fast_retry(),
        )
    }

    async fn expired_hold_envelope(store: &dyn InventoryStore) -> (EventEnvelope, Uuid) {
        let session = Uuid::new_v4();
        let ticket_type = Uuid::new_v4();
        store.upsert_item(session, ticket_type, 10).await.unwrap();
        let hold_id = Uuid::new_v4();
        store
            .hold(HoldRequest {
                hold_id,
                session_id: session,
                ticket_type_id: ticket_type,
                quantity: 2,
                expires_at: Utc::now(),
            })
            .await
            .unwrap();
        let envelope =
            EventEnvelope::new(HOLD_EXPIRED, hold_id, &HoldExpired { hold_id }).unwrap();
        (envelope, hold_id)
    }

    #[tokio::test]
    async fn malformed_messages_dead_letter() {
        let consumer = consumer_over(Arc::new(MemoryInventoryStore::new()));
        let disposition = consumer.process("not json").await;
        assert!(matches!(disposition, Disposition::DeadLettered(_)));
    }

    #[tokio::test]
    async fn unbound_event_types_are_ignored() {
        let consumer = consumer_over(Arc::new(MemoryInventoryStore::new()));
        let envelope =
            EventEnvelope::new("hold.created", Uuid::new_v4(), &serde_json::json!({})).unwrap();
        let raw = serde_json::to_string(&envelope).unwrap();
        assert_eq!(consumer.process(&raw).await, Disposition::Ignored);
    }

    #[tokio::test]
    async fn expired_hold_is_released_once() {
        let store = Arc::new(MemoryInventoryStore::new());
        let consumer = consumer_over(store.clone());
        let (envelope, hold_id) = expired_hold_envelope(store.as_ref()).await;
        let raw = serde_json::to_string(&envelope).unwrap();

        assert_eq!(consumer.process(&raw).await, Disposition::Handled);
        assert_eq!(store.hold_status(hold_id), Some(HoldStatus::Released));

        // Redelivery of the same event id is deduplicated.
        assert_eq!(consumer.process(&raw).await, Disposition::Handled);
        assert_eq!(store.consumed_count(), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let store = Arc::new(FlakyStore::new(2));
        let consumer = consumer_over(store.clone());
        let (envelope, hold_id) = expired_hold_envelope(store.as_ref()).await;
        let raw = serde_json::to_string(&envelope).unwrap();

        assert_eq!(consumer.process(&raw).await, Disposition::Handled);
        assert_eq!(store.inner.hold_status(hold_id), Some(HoldStatus::Released));
    }

    #[tokio::test]
    async fn retry_cap_dead_letters() {
        let store = Arc::new(FlakyStore::new(10));
        let consumer = consumer_over(store.clone());
        let (envelope, hold_id) = expired_hold_envelope(store.as_ref()).await;
        let raw = serde_json::to_string(&envelope).unwrap();

        assert!(matches!(
            consumer.process(&raw).await,
            Disposition::DeadLettered(_)
        ));
        assert_eq!(store.inner.hold_status(hold_id), Some(HoldStatus::Held));
    }
}
