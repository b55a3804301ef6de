use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{error, info};

use crate::store::{HoldStore, HoldStoreError};

/// Periodic sweep over the mirror hold store. Expiry and the `hold.expired`
/// outbox write share a transaction, so a crashed sweep loses nothing and a
/// re-run finds no ACTIVE rows to pick up again.
pub struct ExpiryLoop {
    store: Arc<dyn HoldStore>,
    interval: Duration,
    batch_size: i64,
}

impl ExpiryLoop {
    pub fn new(store: Arc<dyn HoldStore>, interval: Duration, batch_size: i64) -> Self {
        Self {
            store,
            interval,
            batch_size,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("Error expiring holds: {}", e);
            }
        }
    }

    pub async fn sweep(&self) -> Result<usize, HoldStoreError> {
        let expired = self
            .store
            .expire_due_holds(Utc::now(), self.batch_size)
            .await?;
        if !expired.is_empty() {
            info!("Expired {} hold(s)", expired.len());
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHoldStore;
    use crate::models::HoldRecordStatus;
    use crate::store::NewHold;
    use chrono::Duration as ChronoDuration;
    use shared::HOLD_EXPIRED;
    use uuid::Uuid;

    fn hold_expiring_in(seconds: i64) -> NewHold {
        NewHold {
            hold_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            ticket_type_id: Uuid::new_v4(),
            quantity: 1,
            customer_email: "u@example.com".to_owned(),
            expires_at: Utc::now() + ChronoDuration::seconds(seconds),
        }
    }

    fn expiry_loop(store: Arc<MemoryHoldStore>, batch_size: i64) -> ExpiryLoop {
        ExpiryLoop::new(store, Duration::from_secs(60), batch_size)
    }

    #[tokio::test]
    async fn due_holds_expire_once_with_one_event_each() {
        let store = Arc::new(MemoryHoldStore::new());
        let due = hold_expiring_in(-5);
        let due_id = due.hold_id;
        let fresh = hold_expiring_in(600);
        let fresh_id = fresh.hold_id;
        store.create_hold(due).await.unwrap();
        store.create_hold(fresh).await.unwrap();

        let sweep = expiry_loop(store.clone(), 100);
        assert_eq!(sweep.sweep().await.unwrap(), 1);

        let expired = store.get_hold(due_id).await.unwrap();
        assert_eq!(expired.status(), HoldRecordStatus::Expired);
        let active = store.get_hold(fresh_id).await.unwrap();
        assert_eq!(active.status(), HoldRecordStatus::Active);

        let events = store.unpublished_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, HOLD_EXPIRED);
        assert_eq!(events[0].aggregate_id, due_id);

        // Nothing left for the next run.
        assert_eq!(sweep.sweep().await.unwrap(), 0);
        assert_eq!(store.unpublished_events(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sweep_respects_the_batch_limit() {
        let store = Arc::new(MemoryHoldStore::new());
        for _ in 0..5 {
            store.create_hold(hold_expiring_in(-10)).await.unwrap();
        }

        let sweep = expiry_loop(store.clone(), 2);
        assert_eq!(sweep.sweep().await.unwrap(), 2);
        assert_eq!(sweep.sweep().await.unwrap(), 2);
        assert_eq!(sweep.sweep().await.unwrap(), 1);
        assert_eq!(sweep.sweep().await.unwrap(), 0);
        assert_eq!(store.unpublished_events(10).await.unwrap().len(), 5);
    }
}
