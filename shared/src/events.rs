//! Event envelope and typed payloads carried on the broker.
//!
//! All services publish to one durable topic; the envelope's `aggregate_id`
//! is the message key (per-aggregate ordering), `event_id` rides along in a
//! header for dead-letter inspection.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic every domain event is published to.
pub const EVENTS_TOPIC: &str = "ticketing.events";

/// Header carrying the envelope's `event_id` next to the JSON body.
pub const EVENT_ID_HEADER: &str = "event_id";

pub const HOLD_CREATED: &str = "hold.created";
pub const HOLD_EXPIRED: &str = "hold.expired";
pub const ORDER_CONFIRMED: &str = "order.confirmed";
pub const ORDER_CANCELLED: &str = "order.cancelled";

/// Dead-letter topic for a consumer group, e.g. `ticketing.dlq.inventory`.
pub fn dlq_topic(consumer: &str) -> String {
    format!("ticketing.dlq.{consumer}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub aggregate_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<Uuid>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new<P: Serialize>(
        event_type: &str,
        aggregate_id: Uuid,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            occurred_at: Utc::now(),
            aggregate_id,
            idempotency_key: None,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldCreated {
    pub hold_id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldExpired {
    pub hold_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: Uuid,
    pub hold_id: Uuid,
    pub customer_email: String,
    pub total_amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub hold_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_typed_payloads() {
        let hold_id = Uuid::new_v4();
        let payload = HoldExpired { hold_id };
        let envelope = EventEnvelope::new(HOLD_EXPIRED, hold_id, &payload).unwrap();

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_id, envelope.event_id);
        assert_eq!(parsed.event_type, HOLD_EXPIRED);
        assert_eq!(parsed.aggregate_id, hold_id);
        assert_eq!(parsed.payload_as::<HoldExpired>().unwrap().hold_id, hold_id);
    }

    #[test]
    fn absent_idempotency_key_is_omitted() {
        let envelope =
            EventEnvelope::new(ORDER_CANCELLED, Uuid::new_v4(), &serde_json::json!({})).unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("idempotency_key"));
    }

    #[test]
    fn dlq_topics_are_per_consumer() {
        assert_eq!(dlq_topic("inventory"), "ticketing.dlq.inventory");
    }
}
