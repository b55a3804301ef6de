use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{EventEnvelope, HoldExpired, ValidationError, HOLD_EXPIRED};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum HoldStoreError {
    #[error("hold not found")]
    HoldNotFound,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("hold storage unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<diesel::result::Error> for HoldStoreError {
    fn from(err: diesel::result::Error) -> Self {
        HoldStoreError::Unavailable(Box::new(err))
    }
}

impl From<diesel_async::pooled_connection::bb8::RunError> for HoldStoreError {
    fn from(err: diesel_async::pooled_connection::bb8::RunError) -> Self {
        HoldStoreError::Unavailable(Box::new(err))
    }
}

#[derive(Debug, Clone)]
pub struct NewHold {
    pub hold_id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub customer_email: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    /// Record the customer-facing hold as ACTIVE before inventory is called.
    async fn create_hold(&self, hold: NewHold) -> Result<(), HoldStoreError>;

    async fn get_hold(&self, hold_id: Uuid) -> Result<HoldRecord, HoldStoreError>;

    /// Remove a mirror record that never took effect downstream.
    async fn discard_hold(&self, hold_id: Uuid) -> Result<(), HoldStoreError>;

    /// Flip due ACTIVE holds to EXPIRED and write one `hold.expired` outbox
    /// row per hold, all in one transaction. Returns the expired hold ids.
    async fn expire_due_holds(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, HoldStoreError>;

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, HoldStoreError>;

    async fn mark_published(&self, event_id: Uuid) -> Result<(), HoldStoreError>;
}

pub struct PgHoldStore {
    pool: DbPool,
}

impl PgHoldStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn outbox_row(envelope: &EventEnvelope) -> NewOutboxEvent {
    NewOutboxEvent {
        id: envelope.event_id,
        aggregate_id: envelope.aggregate_id,
        event_type: envelope.event_type.clone(),
        payload: envelope.payload.clone(),
    }
}

#[async_trait]
impl HoldStore for PgHoldStore {
    async fn create_hold(&self, hold: NewHold) -> Result<(), HoldStoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(holds::table)
            .values(&NewHoldRecord {
                id: hold.hold_id,
                session_id: hold.session_id,
                ticket_type_id: hold.ticket_type_id,
                quantity: hold.quantity,
                customer_email: hold.customer_email,
                status: HoldRecordStatus::Active.as_str().to_owned(),
                expires_at: hold.expires_at,
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_hold(&self, hold_id: Uuid) -> Result<HoldRecord, HoldStoreError> {
        let mut conn = self.pool.get().await?;
        holds::table
            .find(hold_id)
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(HoldStoreError::HoldNotFound)
    }

    async fn discard_hold(&self, hold_id: Uuid) -> Result<(), HoldStoreError> {
        let mut conn = self.pool.get().await?;
        diesel::delete(holds::table.find(hold_id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire_due_holds(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, HoldStoreError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<Vec<Uuid>, HoldStoreError, _>(|conn| {
            Box::pin(async move {
                // SKIP LOCKED keeps concurrent sweeps from double-expiring.
                let due: Vec<HoldRecord> = holds::table
                    .filter(holds::status.eq(HoldRecordStatus::Active.as_str()))
                    .filter(holds::expires_at.lt(now))
                    .order(holds::expires_at.asc())
                    .limit(limit)
                    .for_update()
                    .skip_locked()
                    .load(conn)
                    .await?;

                if due.is_empty() {
                    return Ok(Vec::new());
                }

                let ids: Vec<Uuid> = due.iter().map(|hold| hold.id).collect();
                diesel::update(holds::table.filter(holds::id.eq_any(&ids)))
                    .set((
                        holds::status.eq(HoldRecordStatus::Expired.as_str()),
                        holds::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                for hold in &due {
                    let envelope = EventEnvelope::new(
                        HOLD_EXPIRED,
                        hold.id,
                        &HoldExpired { hold_id: hold.id },
                    )
                    .map_err(|e| HoldStoreError::Unavailable(Box::new(e)))?;
                    diesel::insert_into(outbox_events::table)
                        .values(&outbox_row(&envelope))
                        .execute(conn)
                        .await?;
                }

                Ok(ids)
            })
        })
        .await
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, HoldStoreError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_events::table
            .filter(outbox_events::published.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<OutboxEvent>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), HoldStoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(outbox_events::table.find(event_id))
            .set((
                outbox_events::published.eq(true),
                outbox_events::published_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
