//! In-memory store double. One mutex plays the role of the per-row lock:
//! every writer serializes on it, so the semantics match the Postgres store
//! without a database. Used by tests; not wired into the binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{EventEnvelope, HoldCreated, HOLD_CREATED};
use uuid::Uuid;

use crate::models::{HoldStatus, OutboxEvent};
use crate::store::{
    Availability, ConsumeOutcome, ConsumerEffect, HoldAccepted, HoldRequest, InventoryError,
    InventoryStore,
};

#[derive(Debug, Clone)]
struct ItemState {
    id: Uuid,
    total_quantity: i32,
    available_quantity: i32,
}

#[derive(Debug, Clone)]
struct HoldState {
    inventory_item_id: Uuid,
    quantity: i32,
    status: HoldStatus,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    items: HashMap<Uuid, ItemState>,
    index: HashMap<(Uuid, Uuid), Uuid>,
    holds: HashMap<Uuid, HoldState>,
    outbox: Vec<OutboxEvent>,
    consumed: HashMap<Uuid, String>,
}

#[derive(Default)]
pub struct MemoryInventoryStore {
    state: Mutex<State>,
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold_status(&self, hold_id: Uuid) -> Option<HoldStatus> {
        self.state
            .lock()
            .unwrap()
            .holds
            .get(&hold_id)
            .map(|h| h.status)
    }

    /// Σ(quantity) of holds in `status` for one item; for invariant checks.
    pub fn held_total(&self, session_id: Uuid, ticket_type_id: Uuid, status: HoldStatus) -> i32 {
        let state = self.state.lock().unwrap();
        let Some(item_id) = state.index.get(&(session_id, ticket_type_id)).copied() else {
            return 0;
        };
        state
            .holds
            .values()
            .filter(|h| h.inventory_item_id == item_id && h.status == status)
            .map(|h| h.quantity)
            .sum()
    }

    pub fn consumed_count(&self) -> usize {
        self.state.lock().unwrap().consumed.len()
    }

    fn availability_of(item: &ItemState) -> Availability {
        Availability {
            total_quantity: item.total_quantity,
            available_quantity: item.available_quantity,
            held_quantity: item.total_quantity - item.available_quantity,
        }
    }

    fn push_outbox(state: &mut State, envelope: EventEnvelope) {
        state.outbox.push(OutboxEvent {
            id: envelope.event_id,
            aggregate_id: envelope.aggregate_id,
            event_type: envelope.event_type,
            payload: envelope.payload,
            published: false,
            created_at: Utc::now(),
            published_at: None,
        });
    }

    fn release_locked(state: &mut State, hold_id: Uuid) -> Result<(), InventoryError> {
        let hold = state
            .holds
            .get(&hold_id)
            .cloned()
            .ok_or(InventoryError::HoldNotFound)?;
        match hold.status {
            HoldStatus::Held => {
                let item = state
                    .items
                    .get_mut(&hold.inventory_item_id)
                    .ok_or(InventoryError::ItemNotFound)?;
                item.available_quantity += hold.quantity;
                state.holds.get_mut(&hold_id).unwrap().status = HoldStatus::Released;
                Ok(())
            }
            HoldStatus::Released => Ok(()),
            HoldStatus::Committed => Err(InventoryError::InvalidStateTransition {
                status: "COMMITTED",
                attempted: "release",
            }),
        }
    }

    fn commit_locked(state: &mut State, hold_id: Uuid) -> Result<(), InventoryError> {
        let hold = state
            .holds
            .get_mut(&hold_id)
            .ok_or(InventoryError::HoldNotFound)?;
        match hold.status {
            HoldStatus::Held => {
                hold.status = HoldStatus::Committed;
                Ok(())
            }
            HoldStatus::Committed => Ok(()),
            HoldStatus::Released => Err(InventoryError::InvalidStateTransition {
                status: "RELEASED",
                attempted: "commit",
            }),
        }
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn upsert_item(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
        total_quantity: i32,
    ) -> Result<Availability, InventoryError> {
        let mut state = self.state.lock().unwrap();
        let key = (session_id, ticket_type_id);
        if let Some(item_id) = state.index.get(&key) {
            let item = &state.items[item_id];
            return Ok(Self::availability_of(item));
        }
        let item = ItemState {
            id: Uuid::new_v4(),
            total_quantity,
            available_quantity: total_quantity,
        };
        let availability = Self::availability_of(&item);
        state.index.insert(key, item.id);
        state.items.insert(item.id, item);
        Ok(availability)
    }

    async fn availability(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<Availability, InventoryError> {
        let state = self.state.lock().unwrap();
        let item_id = state
            .index
            .get(&(session_id, ticket_type_id))
            .ok_or(InventoryError::ItemNotFound)?;
        Ok(Self::availability_of(&state.items[item_id]))
    }

    async fn hold(&self, request: HoldRequest) -> Result<HoldAccepted, InventoryError> {
        let mut state = self.state.lock().unwrap();
        let item_id = *state
            .index
            .get(&(request.session_id, request.ticket_type_id))
            .ok_or(InventoryError::ItemNotFound)?;

        if let Some(hold) = state.holds.get(&request.hold_id) {
            let available = state.items[&item_id].available_quantity;
            return match hold.status {
                // Live holds replay only on matching attributes; a reused id
                // with different parameters is a conflict, not a retry.
                HoldStatus::Held
                    if hold.inventory_item_id == item_id
                        && hold.quantity == request.quantity
                        && hold.expires_at.timestamp_micros()
                            == request.expires_at.timestamp_micros() =>
                {
                    Ok(HoldAccepted {
                        available_quantity: available,
                        replayed: true,
                    })
                }
                HoldStatus::Held => Err(InventoryError::HoldMismatch),
                HoldStatus::Released | HoldStatus::Committed => Ok(HoldAccepted {
                    available_quantity: available,
                    replayed: true,
                }),
            };
        }

        let item = state.items.get_mut(&item_id).unwrap();
        if item.available_quantity < request.quantity {
            return Err(InventoryError::InsufficientInventory {
                available: item.available_quantity,
            });
        }
        item.available_quantity -= request.quantity;
        let remaining = item.available_quantity;

        state.holds.insert(
            request.hold_id,
            HoldState {
                inventory_item_id: item_id,
                quantity: request.quantity,
                status: HoldStatus::Held,
                expires_at: request.expires_at,
            },
        );

        let envelope = EventEnvelope::new(
            HOLD_CREATED,
            request.hold_id,
            &HoldCreated {
                hold_id: request.hold_id,
                session_id: request.session_id,
                ticket_type_id: request.ticket_type_id,
                quantity: request.quantity,
                expires_at: request.expires_at,
            },
        )
        .map_err(|e| InventoryError::Unavailable(Box::new(e)))?;
        Self::push_outbox(&mut state, envelope);

        Ok(HoldAccepted {
            available_quantity: remaining,
            replayed: false,
        })
    }

    async fn release(&self, hold_id: Uuid) -> Result<(), InventoryError> {
        let mut state = self.state.lock().unwrap();
        Self::release_locked(&mut state, hold_id)
    }

    async fn commit(&self, hold_id: Uuid) -> Result<(), InventoryError> {
        let mut state = self.state.lock().unwrap();
        Self::commit_locked(&mut state, hold_id)
    }

    async fn apply_consumed(
        &self,
        event_id: Uuid,
        event_type: &str,
        effect: ConsumerEffect,
    ) -> Result<ConsumeOutcome, InventoryError> {
        let mut state = self.state.lock().unwrap();
        if state.consumed.contains_key(&event_id) {
            return Ok(ConsumeOutcome::Duplicate);
        }

        let result = match effect {
            ConsumerEffect::CommitHold(hold_id) => Self::commit_locked(&mut state, hold_id),
            ConsumerEffect::ReleaseHold(hold_id) => Self::release_locked(&mut state, hold_id),
        };
        let outcome = match result {
            Ok(()) => ConsumeOutcome::Applied,
            Err(
                err @ (InventoryError::HoldNotFound
                | InventoryError::InvalidStateTransition { .. }),
            ) => ConsumeOutcome::Skipped {
                reason: err.to_string(),
            },
            Err(err) => return Err(err),
        };

        state.consumed.insert(event_id, event_type.to_owned());
        Ok(outcome)
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, InventoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|e| !e.published)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), InventoryError> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == event_id) {
            event.published = true;
            event.published_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use shared::HOLD_EXPIRED;

    use super::*;

    fn request(hold_id: Uuid, session_id: Uuid, ticket_type_id: Uuid, quantity: i32) -> HoldRequest {
        HoldRequest {
            hold_id,
            session_id,
            ticket_type_id,
            quantity,
            expires_at: Utc::now() + Duration::seconds(600),
        }
    }

    async fn seeded(total: i32) -> (MemoryInventoryStore, Uuid, Uuid) {
        let store = MemoryInventoryStore::new();
        let session_id = Uuid::new_v4();
        let ticket_type_id = Uuid::new_v4();
        store
            .upsert_item(session_id, ticket_type_id, total)
            .await
            .unwrap();
        (store, session_id, ticket_type_id)
    }

    async fn assert_conserved(store: &MemoryInventoryStore, session: Uuid, ticket_type: Uuid) {
        let availability = store
            .availability(session, ticket_type)
            .await
            .expect("item exists");
        let held = store.held_total(session, ticket_type, HoldStatus::Held);
        let committed = store.held_total(session, ticket_type, HoldStatus::Committed);
        assert_eq!(
            availability.available_quantity + held + committed,
            availability.total_quantity
        );
        assert!(availability.available_quantity >= 0);
        assert!(availability.available_quantity <= availability.total_quantity);
    }

    #[tokio::test]
    async fn hold_decrements_and_writes_outbox() {
        let (store, session, ticket_type) = seeded(100).await;
        let hold_id = Uuid::new_v4();

        let accepted = store.hold(request(hold_id, session, ticket_type, 2)).await.unwrap();
        assert_eq!(accepted.available_quantity, 98);
        assert!(!accepted.replayed);

        let events = store.unpublished_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, HOLD_CREATED);
        assert_eq!(events[0].aggregate_id, hold_id);
        assert_conserved(&store, session, ticket_type).await;
    }

    #[tokio::test]
    async fn repeated_hold_is_idempotent() {
        let (store, session, ticket_type) = seeded(100).await;
        // A true retry carries the identical payload, expiry included.
        let retried = request(Uuid::new_v4(), session, ticket_type, 1);

        for attempt in 0..5 {
            let accepted = store.hold(retried.clone()).await.unwrap();
            assert_eq!(accepted.available_quantity, 99);
            assert_eq!(accepted.replayed, attempt > 0);
        }

        let availability = store.availability(session, ticket_type).await.unwrap();
        assert_eq!(availability.available_quantity, 99);
        assert_eq!(store.unpublished_events(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reused_hold_id_with_different_attributes_is_rejected() {
        let (store, session, ticket_type) = seeded(10).await;
        let first = request(Uuid::new_v4(), session, ticket_type, 2);
        store.hold(first.clone()).await.unwrap();

        let mut different_quantity = first.clone();
        different_quantity.quantity = 3;
        assert!(matches!(
            store.hold(different_quantity).await.unwrap_err(),
            InventoryError::HoldMismatch
        ));

        let mut different_expiry = first.clone();
        different_expiry.expires_at = first.expires_at + Duration::seconds(60);
        assert!(matches!(
            store.hold(different_expiry).await.unwrap_err(),
            InventoryError::HoldMismatch
        ));

        // The stored hold is untouched and still accounted for exactly once.
        assert_eq!(store.hold_status(first.hold_id), Some(HoldStatus::Held));
        let availability = store.availability(session, ticket_type).await.unwrap();
        assert_eq!(availability.available_quantity, 8);
        assert_eq!(store.unpublished_events(10).await.unwrap().len(), 1);
        assert_conserved(&store, session, ticket_type).await;
    }

    #[tokio::test]
    async fn terminal_holds_replay_regardless_of_attributes() {
        let (store, session, ticket_type) = seeded(10).await;
        let first = request(Uuid::new_v4(), session, ticket_type, 2);
        store.hold(first.clone()).await.unwrap();
        store.release(first.hold_id).await.unwrap();

        let mut different_quantity = first.clone();
        different_quantity.quantity = 5;
        let accepted = store.hold(different_quantity).await.unwrap();
        assert!(accepted.replayed);
        assert_eq!(accepted.available_quantity, 10);
        assert_eq!(store.hold_status(first.hold_id), Some(HoldStatus::Released));
        assert_conserved(&store, session, ticket_type).await;
    }

    #[tokio::test]
    async fn insufficient_inventory_reports_available() {
        let (store, session, ticket_type) = seeded(3).await;
        store
            .hold(request(Uuid::new_v4(), session, ticket_type, 2))
            .await
            .unwrap();

        let err = store
            .hold(request(Uuid::new_v4(), session, ticket_type, 2))
            .await
            .unwrap_err();
        match err {
            InventoryError::InsufficientInventory { available } => assert_eq!(available, 1),
            other => panic!("expected insufficient inventory, got {other:?}"),
        }
        assert_conserved(&store, session, ticket_type).await;
    }

    #[tokio::test]
    async fn release_restores_availability() {
        let (store, session, ticket_type) = seeded(10).await;
        let hold_id = Uuid::new_v4();
        store.hold(request(hold_id, session, ticket_type, 4)).await.unwrap();

        store.release(hold_id).await.unwrap();
        let availability = store.availability(session, ticket_type).await.unwrap();
        assert_eq!(availability.available_quantity, 10);
        assert_eq!(store.hold_status(hold_id), Some(HoldStatus::Released));

        // Releasing again is a no-op, not a second increment.
        store.release(hold_id).await.unwrap();
        let availability = store.availability(session, ticket_type).await.unwrap();
        assert_eq!(availability.available_quantity, 10);
        assert_conserved(&store, session, ticket_type).await;
    }

    #[tokio::test]
    async fn commit_keeps_quantity_reserved() {
        let (store, session, ticket_type) = seeded(100).await;
        let hold_id = Uuid::new_v4();
        store.hold(request(hold_id, session, ticket_type, 2)).await.unwrap();

        store.commit(hold_id).await.unwrap();
        let availability = store.availability(session, ticket_type).await.unwrap();
        assert_eq!(availability.available_quantity, 98);
        assert_eq!(availability.held_quantity, 2);
        assert_eq!(store.hold_status(hold_id), Some(HoldStatus::Committed));

        store.commit(hold_id).await.unwrap();

        let err = store.release(hold_id).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidStateTransition { .. }));
        assert_conserved(&store, session, ticket_type).await;
    }

    #[tokio::test]
    async fn commit_after_release_is_rejected() {
        let (store, session, ticket_type) = seeded(10).await;
        let hold_id = Uuid::new_v4();
        store.hold(request(hold_id, session, ticket_type, 1)).await.unwrap();
        store.release(hold_id).await.unwrap();

        let err = store.commit(hold_id).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_hold_is_not_found() {
        let (store, _, _) = seeded(10).await;
        assert!(matches!(
            store.release(Uuid::new_v4()).await.unwrap_err(),
            InventoryError::HoldNotFound
        ));
        assert!(matches!(
            store.commit(Uuid::new_v4()).await.unwrap_err(),
            InventoryError::HoldNotFound
        ));
    }

    #[tokio::test]
    async fn contention_never_oversells() {
        let (store, session, ticket_type) = seeded(10).await;
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .hold(request(Uuid::new_v4(), session, ticket_type, 1))
                    .await
            }));
        }

        let mut succeeded = 0;
        let mut insufficient = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(InventoryError::InsufficientInventory { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(insufficient, 10);
        let availability = store.availability(session, ticket_type).await.unwrap();
        assert_eq!(availability.available_quantity, 0);
        assert_eq!(store.held_total(session, ticket_type, HoldStatus::Held), 10);
        assert_conserved(&store, session, ticket_type).await;
    }

    #[tokio::test]
    async fn consumed_events_deduplicate_effects() {
        let (store, session, ticket_type) = seeded(10).await;
        let hold_id = Uuid::new_v4();
        store.hold(request(hold_id, session, ticket_type, 3)).await.unwrap();

        let event_id = Uuid::new_v4();
        let outcome = store
            .apply_consumed(event_id, HOLD_EXPIRED, ConsumerEffect::ReleaseHold(hold_id))
            .await
            .unwrap();
        assert_eq!(outcome, ConsumeOutcome::Applied);

        let outcome = store
            .apply_consumed(event_id, HOLD_EXPIRED, ConsumerEffect::ReleaseHold(hold_id))
            .await
            .unwrap();
        assert_eq!(outcome, ConsumeOutcome::Duplicate);

        let availability = store.availability(session, ticket_type).await.unwrap();
        assert_eq!(availability.available_quantity, 10);
        assert_eq!(store.consumed_count(), 1);
    }

    #[tokio::test]
    async fn consuming_for_a_missing_hold_is_recorded_and_skipped() {
        let (store, _, _) = seeded(10).await;
        let outcome = store
            .apply_consumed(
                Uuid::new_v4(),
                HOLD_EXPIRED,
                ConsumerEffect::ReleaseHold(Uuid::new_v4()),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Skipped { .. }));
        assert_eq!(store.consumed_count(), 1);
    }

    #[tokio::test]
    async fn publisher_sees_oldest_first_and_marks_rows() {
        let (store, session, ticket_type) = seeded(10).await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.hold(request(first, session, ticket_type, 1)).await.unwrap();
        store.hold(request(second, session, ticket_type, 1)).await.unwrap();

        let pending = store.unpublished_events(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].aggregate_id, first);

        store.mark_published(pending[0].id).await.unwrap();
        let pending = store.unpublished_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].aggregate_id, second);
    }
}
