//! In-memory hold store double for expiry-loop and API tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{EventEnvelope, HoldExpired, HOLD_EXPIRED};
use uuid::Uuid;

use crate::models::{HoldRecord, HoldRecordStatus, OutboxEvent};
use crate::store::{HoldStore, HoldStoreError, NewHold};

#[derive(Default)]
struct State {
    holds: HashMap<Uuid, HoldRecord>,
    outbox: Vec<OutboxEvent>,
}

#[derive(Default)]
pub struct MemoryHoldStore {
    state: Mutex<State>,
}

impl MemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold_count(&self) -> usize {
        self.state.lock().unwrap().holds.len()
    }
}

#[async_trait]
impl HoldStore for MemoryHoldStore {
    async fn create_hold(&self, hold: NewHold) -> Result<(), HoldStoreError> {
        let now = Utc::now();
        let record = HoldRecord {
            id: hold.hold_id,
            session_id: hold.session_id,
            ticket_type_id: hold.ticket_type_id,
            quantity: hold.quantity,
            customer_email: hold.customer_email,
            status: HoldRecordStatus::Active.as_str().to_owned(),
            expires_at: hold.expires_at,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().unwrap().holds.insert(hold.hold_id, record);
        Ok(())
    }

    async fn get_hold(&self, hold_id: Uuid) -> Result<HoldRecord, HoldStoreError> {
        self.state
            .lock()
            .unwrap()
            .holds
            .get(&hold_id)
            .cloned()
            .ok_or(HoldStoreError::HoldNotFound)
    }

    async fn discard_hold(&self, hold_id: Uuid) -> Result<(), HoldStoreError> {
        self.state.lock().unwrap().holds.remove(&hold_id);
        Ok(())
    }

    async fn expire_due_holds(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, HoldStoreError> {
        let mut state = self.state.lock().unwrap();
        let mut due: Vec<Uuid> = state
            .holds
            .values()
            .filter(|hold| hold.status().is_active() && hold.expires_at < now)
            .map(|hold| hold.id)
            .collect();
        due.sort();
        due.truncate(limit as usize);

        for hold_id in &due {
            let hold = state.holds.get_mut(hold_id).unwrap();
            hold.status = HoldRecordStatus::Expired.as_str().to_owned();
            hold.updated_at = Utc::now();

            let envelope =
                EventEnvelope::new(HOLD_EXPIRED, *hold_id, &HoldExpired { hold_id: *hold_id })
                    .map_err(|e| HoldStoreError::Unavailable(Box::new(e)))?;
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

        Ok(due)
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, HoldStoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|e| !e.published)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), HoldStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == event_id) {
            event.published = true;
            event.published_at = Some(Utc::now());
        }
        Ok(())
    }
}
