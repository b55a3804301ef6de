use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::{EventEnvelope, EVENTS_TOPIC, EVENT_ID_HEADER};
use tokio::time;
use tracing::{error, info};

use crate::models::OutboxEvent;
use crate::store::InventoryStore;

/// Drains unpublished outbox rows to the broker. At-least-once: the row is
/// only flagged after the broker ack, so a crash in between republishes.
pub struct OutboxPublisher {
    store: Arc<dyn InventoryStore>,
    producer: FutureProducer,
    poll_interval: Duration,
    batch_size: i64,
}

impl OutboxPublisher {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        producer: FutureProducer,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            producer,
            poll_interval,
            batch_size,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.poll_interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.drain().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    async fn drain(&self) -> Result<()> {
        let pending = self.store.unpublished_events(self.batch_size).await?;

        for event in pending {
            if let Err(e) = self.publish(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }

            self.store.mark_published(event.id).await?;
            info!("Published outbox event: {}", event.id);
        }

        Ok(())
    }

    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        let envelope = EventEnvelope {
            event_id: event.id,
            event_type: event.event_type.clone(),
            occurred_at: event.created_at,
            aggregate_id: event.aggregate_id,
            idempotency_key: None,
            payload: event.payload.clone(),
        };
        let json = serde_json::to_string(&envelope)?;
        let key = event.aggregate_id.to_string();
        let event_id = event.id.to_string();
        let record = FutureRecord::to(EVENTS_TOPIC)
            .payload(&json)
            .key(&key)
            .headers(OwnedHeaders::new().insert(Header {
                key: EVENT_ID_HEADER,
                value: Some(&event_id),
            }));

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}
