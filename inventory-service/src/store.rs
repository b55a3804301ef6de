use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use shared::{EventEnvelope, HoldCreated, ValidationError, HOLD_CREATED};
use thiserror::Error;
use uuid::Uuid;

pub use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("insufficient inventory: {available} available")]
    InsufficientInventory { available: i32 },
    #[error("inventory item not found")]
    ItemNotFound,
    #[error("hold not found")]
    HoldNotFound,
    #[error("hold already exists with different attributes")]
    HoldMismatch,
    #[error("hold is {status}, cannot {attempted}")]
    InvalidStateTransition {
        status: &'static str,
        attempted: &'static str,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
    #[error("inventory storage unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl InventoryError {
    /// Worth retrying: the failure came from infrastructure, not the domain.
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::Unavailable(_))
    }
}

impl From<diesel::result::Error> for InventoryError {
    fn from(err: diesel::result::Error) -> Self {
        InventoryError::Unavailable(Box::new(err))
    }
}

impl From<diesel_async::pooled_connection::bb8::RunError> for InventoryError {
    fn from(err: diesel_async::pooled_connection::bb8::RunError) -> Self {
        InventoryError::Unavailable(Box::new(err))
    }
}

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub hold_id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct HoldAccepted {
    pub available_quantity: i32,
    /// The hold already existed; nothing changed.
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Availability {
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub held_quantity: i32,
}

/// Consumer-side effect applied together with the dedup record.
#[derive(Debug, Clone, Copy)]
pub enum ConsumerEffect {
    CommitHold(Uuid),
    ReleaseHold(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Effect ran and the event was recorded.
    Applied,
    /// Event id already recorded; nothing ran.
    Duplicate,
    /// Domain no-op (e.g. hold gone); recorded so the message never returns.
    Skipped { reason: String },
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Seed or fetch the row for a `(session_id, ticket_type_id)` pair.
    /// Existing rows are returned untouched: total quantity is fixed at creation.
    async fn upsert_item(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
        total_quantity: i32,
    ) -> Result<Availability, InventoryError>;

    /// Lock-free snapshot read; may be slightly stale under contention.
    async fn availability(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<Availability, InventoryError>;

    async fn hold(&self, request: HoldRequest) -> Result<HoldAccepted, InventoryError>;

    async fn release(&self, hold_id: Uuid) -> Result<(), InventoryError>;

    async fn commit(&self, hold_id: Uuid) -> Result<(), InventoryError>;

    /// Run `effect` and insert the dedup row in one transaction.
    async fn apply_consumed(
        &self,
        event_id: Uuid,
        event_type: &str,
        effect: ConsumerEffect,
    ) -> Result<ConsumeOutcome, InventoryError>;

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, InventoryError>;

    async fn mark_published(&self, event_id: Uuid) -> Result<(), InventoryError>;
}

pub struct PgInventoryStore {
    pool: DbPool,
}

impl PgInventoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

enum Transition {
    Applied,
    AlreadyInTargetState,
}

/// Release under the item row lock. Callers must not hold other row locks.
async fn release_in_tx(
    conn: &mut AsyncPgConnection,
    hold_id: Uuid,
) -> Result<Transition, InventoryError> {
    let hold = locked_hold(conn, hold_id).await?;
    match hold.status() {
        HoldStatus::Held => {
            diesel::update(inventory_items::table.find(hold.inventory_item_id))
                .set((
                    inventory_items::available_quantity
                        .eq(inventory_items::available_quantity + hold.quantity),
                    inventory_items::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;
            diesel::update(inventory_holds::table.find(hold.id))
                .set((
                    inventory_holds::status.eq(HoldStatus::Released.as_str()),
                    inventory_holds::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;
            Ok(Transition::Applied)
        }
        HoldStatus::Released => Ok(Transition::AlreadyInTargetState),
        HoldStatus::Committed => Err(InventoryError::InvalidStateTransition {
            status: "COMMITTED",
            attempted: "release",
        }),
    }
}

/// Commit reclassifies held capacity; quantities never move.
async fn commit_in_tx(
    conn: &mut AsyncPgConnection,
    hold_id: Uuid,
) -> Result<Transition, InventoryError> {
    let hold = locked_hold(conn, hold_id).await?;
    match hold.status() {
        HoldStatus::Held => {
            diesel::update(inventory_holds::table.find(hold.id))
                .set((
                    inventory_holds::status.eq(HoldStatus::Committed.as_str()),
                    inventory_holds::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;
            Ok(Transition::Applied)
        }
        HoldStatus::Committed => Ok(Transition::AlreadyInTargetState),
        HoldStatus::Released => Err(InventoryError::InvalidStateTransition {
            status: "RELEASED",
            attempted: "commit",
        }),
    }
}

/// Load a hold, take the exclusive lock on its inventory row, and re-read the
/// hold under that lock. Every writer for an item goes through its row lock,
/// so the second read is serialized.
async fn locked_hold(
    conn: &mut AsyncPgConnection,
    hold_id: Uuid,
) -> Result<HoldRow, InventoryError> {
    let hold: HoldRow = inventory_holds::table
        .find(hold_id)
        .first(conn)
        .await
        .optional()?
        .ok_or(InventoryError::HoldNotFound)?;

    let _item: InventoryItem = inventory_items::table
        .find(hold.inventory_item_id)
        .for_update()
        .first(conn)
        .await?;

    let hold: HoldRow = inventory_holds::table.find(hold_id).first(conn).await?;
    Ok(hold)
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
impl InventoryStore for PgInventoryStore {
    async fn upsert_item(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
        total_quantity: i32,
    ) -> Result<Availability, InventoryError> {
        let mut conn = self.pool.get().await?;
        let row = NewInventoryItem {
            id: Uuid::new_v4(),
            session_id,
            ticket_type_id,
            total_quantity,
            available_quantity: total_quantity,
        };
        diesel::insert_into(inventory_items::table)
            .values(&row)
            .on_conflict((
                inventory_items::session_id,
                inventory_items::ticket_type_id,
            ))
            .do_nothing()
            .execute(&mut conn)
            .await?;

        self.availability(session_id, ticket_type_id).await
    }

    async fn availability(
        &self,
        session_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<Availability, InventoryError> {
        let mut conn = self.pool.get().await?;
        let item: InventoryItem = inventory_items::table
            .filter(inventory_items::session_id.eq(session_id))
            .filter(inventory_items::ticket_type_id.eq(ticket_type_id))
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(InventoryError::ItemNotFound)?;
        Ok(Availability {
            total_quantity: item.total_quantity,
            available_quantity: item.available_quantity,
            held_quantity: item.held_quantity(),
        })
    }

    async fn hold(&self, request: HoldRequest) -> Result<HoldAccepted, InventoryError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<HoldAccepted, InventoryError, _>(|conn| {
            Box::pin(async move {
                let item: InventoryItem = inventory_items::table
                    .filter(inventory_items::session_id.eq(request.session_id))
                    .filter(inventory_items::ticket_type_id.eq(request.ticket_type_id))
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(InventoryError::ItemNotFound)?;

                let existing: Option<HoldRow> = inventory_holds::table
                    .find(request.hold_id)
                    .first(conn)
                    .await
                    .optional()?;

                if let Some(hold) = existing {
                    return match hold.status() {
                        // A live hold replays only when the request matches
                        // what was stored; a reused id with different
                        // attributes is a conflict, not a retry. Expiry is
                        // compared at microseconds, the timestamptz precision.
                        HoldStatus::Held
                            if hold.inventory_item_id == item.id
                                && hold.quantity == request.quantity
                                && hold.expires_at.timestamp_micros()
                                    == request.expires_at.timestamp_micros() =>
                        {
                            Ok(HoldAccepted {
                                available_quantity: item.available_quantity,
                                replayed: true,
                            })
                        }
                        HoldStatus::Held => Err(InventoryError::HoldMismatch),
                        // Terminal holds: success without modification.
                        HoldStatus::Released | HoldStatus::Committed => Ok(HoldAccepted {
                            available_quantity: item.available_quantity,
                            replayed: true,
                        }),
                    };
                }

                if item.available_quantity < request.quantity {
                    return Err(InventoryError::InsufficientInventory {
                        available: item.available_quantity,
                    });
                }

                let remaining = item.available_quantity - request.quantity;
                diesel::update(inventory_items::table.find(item.id))
                    .set((
                        inventory_items::available_quantity.eq(remaining),
                        inventory_items::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                diesel::insert_into(inventory_holds::table)
                    .values(&NewHoldRow {
                        id: request.hold_id,
                        inventory_item_id: item.id,
                        quantity: request.quantity,
                        status: HoldStatus::Held.as_str().to_owned(),
                        expires_at: request.expires_at,
                    })
                    .execute(conn)
                    .await?;

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
                diesel::insert_into(outbox_events::table)
                    .values(&outbox_row(&envelope))
                    .execute(conn)
                    .await?;

                Ok(HoldAccepted {
                    available_quantity: remaining,
                    replayed: false,
                })
            })
        })
        .await
    }

    async fn release(&self, hold_id: Uuid) -> Result<(), InventoryError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<(), InventoryError, _>(|conn| {
            Box::pin(async move {
                release_in_tx(conn, hold_id).await?;
                Ok(())
            })
        })
        .await
    }

    async fn commit(&self, hold_id: Uuid) -> Result<(), InventoryError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<(), InventoryError, _>(|conn| {
            Box::pin(async move {
                commit_in_tx(conn, hold_id).await?;
                Ok(())
            })
        })
        .await
    }

    async fn apply_consumed(
        &self,
        event_id: Uuid,
        event_type: &str,
        effect: ConsumerEffect,
    ) -> Result<ConsumeOutcome, InventoryError> {
        let mut conn = self.pool.get().await?;
        let event_type = event_type.to_owned();
        conn.transaction::<ConsumeOutcome, InventoryError, _>(|conn| {
            Box::pin(async move {
                let seen: Option<ConsumedEvent> = consumed_events::table
                    .find(event_id)
                    .first(conn)
                    .await
                    .optional()?;
                if seen.is_some() {
                    return Ok(ConsumeOutcome::Duplicate);
                }

                let result = match effect {
                    ConsumerEffect::CommitHold(hold_id) => commit_in_tx(conn, hold_id).await,
                    ConsumerEffect::ReleaseHold(hold_id) => release_in_tx(conn, hold_id).await,
                };
                let outcome = match result {
                    Ok(_) => ConsumeOutcome::Applied,
                    Err(
                        err @ (InventoryError::HoldNotFound
                        | InventoryError::InvalidStateTransition { .. }),
                    ) => ConsumeOutcome::Skipped {
                        reason: err.to_string(),
                    },
                    Err(err) => return Err(err),
                };

                diesel::insert_into(consumed_events::table)
                    .values(&NewConsumedEvent {
                        event_id,
                        event_type,
                    })
                    .execute(conn)
                    .await?;

                Ok(outcome)
            })
        })
        .await
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, InventoryError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_events::table
            .filter(outbox_events::published.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<OutboxEvent>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), InventoryError> {
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
