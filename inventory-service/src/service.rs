use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{EventEnvelope, HoldExpired, OrderConfirmed, Quantity, HOLD_EXPIRED, ORDER_CONFIRMED};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{
    Availability, ConsumeOutcome, ConsumerEffect, HoldAccepted, HoldRequest, InventoryError,
    InventoryStore,
};

#[derive(Debug, Clone)]
pub struct HoldCommand {
    pub hold_id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
}

/// Validates input, delegates to the store, and logs outcomes. All shared
/// state lives behind the store; the service itself is stateless.
pub struct InventoryService {
    store: Arc<dyn InventoryStore>,
}

impl InventoryService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    pub async fn hold(&self, command: HoldCommand) -> Result<HoldAccepted, InventoryError> {
        let quantity = Quantity::new(command.quantity)?;
        let accepted = self
            .store
            .hold(HoldRequest {
                hold_id: command.hold_id,
                session_id: command.session_id,
                ticket_type_id: command.ticket_type_id,
                quantity: quantity.get(),
                expires_at: command.expires_at,
            })
            .await?;
        if accepted.replayed {
            info!("Hold {} replayed, no state change", command.hold_id);
        } else {
            info!(
                "Hold {} accepted for {} ticket(s), {} remaining",
                command.hold_id, quantity, accepted.available_quantity
            );
        }
        Ok(accepted)
    }

    pub async fn release(&self, hold_id: Uuid) -> Result<(), InventoryError> {
        self.store.release(hold_id).await?;
        info!("Hold {} released", hold_id);
        Ok(())
    }

    pub async fn commit(&self, hold_id: Uuid) -> Result<(), InventoryError> {
        self.store.commit(hold_id).await?;
        info!("Hold {} committed", hold_id);
        Ok(())
    }

    pub async fn availability(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<Availability, InventoryError> {
        self.store.availability(session_id, ticket_type_id).await
    }

    pub async fn upsert_item(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
        total_quantity: i32,
    ) -> Result<Availability, InventoryError> {
        let total = Quantity::new(total_quantity)?;
        let availability = self
            .store
            .upsert_item(session_id, ticket_type_id, total.get())
            .await?;
        info!(
            "Inventory item ready for session {} ticket type {}: {} total",
            session_id, ticket_type_id, availability.total_quantity
        );
        Ok(availability)
    }

    /// Consumer entry point: translate an envelope into its idempotent effect.
    pub async fn apply_event(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<ConsumeOutcome, InventoryError> {
        let effect = match envelope.event_type.as_str() {
            ORDER_CONFIRMED => {
                let payload: OrderConfirmed = envelope
                    .payload_as()
                    .map_err(|e| InventoryError::MalformedEvent(e.to_string()))?;
                ConsumerEffect::CommitHold(payload.hold_id)
            }
            HOLD_EXPIRED => {
                let payload: HoldExpired = envelope
                    .payload_as()
                    .map_err(|e| InventoryError::MalformedEvent(e.to_string()))?;
                ConsumerEffect::ReleaseHold(payload.hold_id)
            }
            other => {
                return Err(InventoryError::MalformedEvent(format!(
                    "unhandled event type {other}"
                )))
            }
        };

        let outcome = self
            .store
            .apply_consumed(envelope.event_id, &envelope.event_type, effect)
            .await?;
        match &outcome {
            ConsumeOutcome::Applied => {
                info!("Applied {} event {}", envelope.event_type, envelope.event_id)
            }
            ConsumeOutcome::Duplicate => {
                info!("Skipped duplicate event {}", envelope.event_id)
            }
            ConsumeOutcome::Skipped { reason } => warn!(
                "Recorded {} event {} without effect: {}",
                envelope.event_type, envelope.event_id, reason
            ),
        }
        Ok(outcome)
    }
}
