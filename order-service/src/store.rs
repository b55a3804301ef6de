use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    EventEnvelope, OrderCancelled, OrderConfirmed, ValidationError, ORDER_CANCELLED,
    ORDER_CONFIRMED,
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order not found")]
    OrderNotFound,
    #[error("order is {status}, cannot {attempted}")]
    InvalidStateTransition {
        status: &'static str,
        attempted: &'static str,
    },
    #[error("payment failed")]
    PaymentFailed,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("order storage unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<diesel::result::Error> for OrderError {
    fn from(err: diesel::result::Error) -> Self {
        OrderError::Unavailable(Box::new(err))
    }
}

impl From<diesel_async::pooled_connection::bb8::RunError> for OrderError {
    fn from(err: diesel_async::pooled_connection::bb8::RunError) -> Self {
        OrderError::Unavailable(Box::new(err))
    }
}

/// Validated order-to-be; produced by the service layer.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: Uuid,
    pub idempotency_key: String,
    pub customer_email: String,
    pub hold_id: Uuid,
    pub total_amount: BigDecimal,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: OrderRow,
    pub items: Vec<OrderItemRow>,
    pub payment: PaymentRow,
}

#[derive(Debug, Clone)]
pub struct CreateResult {
    pub details: OrderDetails,
    /// False when the idempotency key matched an existing order.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    Confirmed(OrderDetails),
    AlreadyConfirmed(OrderDetails),
    /// Payment declined; the FAILED payment row is persisted, order stays PENDING.
    PaymentFailed(OrderDetails),
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(OrderDetails),
    AlreadyCancelled(OrderDetails),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: NewOrder) -> Result<CreateResult, OrderError>;

    async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, OrderError>;

    /// Apply the payment result under the order row lock.
    async fn confirm_order(
        &self,
        order_id: Uuid,
        payment_succeeds: bool,
    ) -> Result<ConfirmOutcome, OrderError>;

    async fn cancel_order(&self, order_id: Uuid) -> Result<CancelOutcome, OrderError>;

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, OrderError>;

    async fn mark_published(&self, event_id: Uuid) -> Result<(), OrderError>;
}

pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn load_details(
    conn: &mut AsyncPgConnection,
    order: OrderRow,
) -> Result<OrderDetails, OrderError> {
    let items = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .order(order_items::created_at.asc())
        .load::<OrderItemRow>(conn)
        .await?;
    let payment = payments::table
        .filter(payments::order_id.eq(order.id))
        .first::<PaymentRow>(conn)
        .await?;
    Ok(OrderDetails {
        order,
        items,
        payment,
    })
}

async fn find_by_key(
    conn: &mut AsyncPgConnection,
    key: &str,
) -> Result<Option<OrderDetails>, OrderError> {
    let existing: Option<OrderRow> = orders::table
        .filter(orders::idempotency_key.eq(key))
        .first(conn)
        .await
        .optional()?;
    match existing {
        Some(order) => Ok(Some(load_details(conn, order).await?)),
        None => Ok(None),
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
impl OrderStore for PgOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<CreateResult, OrderError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<CreateResult, OrderError, _>(|conn| {
            Box::pin(async move {
                if let Some(details) = find_by_key(conn, &order.idempotency_key).await? {
                    return Ok(CreateResult {
                        details,
                        created: false,
                    });
                }

                let row = NewOrderRow {
                    id: order.order_id,
                    customer_email: order.customer_email.clone(),
                    status: OrderStatus::Pending.as_str().to_owned(),
                    total_amount: order.total_amount.clone(),
                    idempotency_key: order.idempotency_key.clone(),
                    hold_id: order.hold_id,
                };
                // DO NOTHING instead of catching the unique violation: a
                // violation would abort the whole transaction.
                let inserted = diesel::insert_into(orders::table)
                    .values(&row)
                    .on_conflict(orders::idempotency_key)
                    .do_nothing()
                    .execute(conn)
                    .await?;
                if inserted == 0 {
                    // Lost the race on the idempotency key; return the winner.
                    let details = find_by_key(conn, &order.idempotency_key)
                        .await?
                        .ok_or(OrderError::OrderNotFound)?;
                    return Ok(CreateResult {
                        details,
                        created: false,
                    });
                }

                for line in &order.lines {
                    diesel::insert_into(order_items::table)
                        .values(&NewOrderItemRow {
                            id: Uuid::new_v4(),
                            order_id: order.order_id,
                            session_id: line.session_id,
                            ticket_type_id: line.ticket_type_id,
                            quantity: line.quantity,
                            unit_price: line.unit_price.clone(),
                        })
                        .execute(conn)
                        .await?;
                }

                diesel::insert_into(payments::table)
                    .values(&NewPaymentRow {
                        id: Uuid::new_v4(),
                        order_id: order.order_id,
                        status: PaymentStatus::Pending.as_str().to_owned(),
                        amount: order.total_amount.clone(),
                    })
                    .execute(conn)
                    .await?;

                let order_row: OrderRow =
                    orders::table.find(order.order_id).first(conn).await?;
                let details = load_details(conn, order_row).await?;
                Ok(CreateResult {
                    details,
                    created: true,
                })
            })
        })
        .await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, OrderError> {
        let mut conn = self.pool.get().await?;
        let order: OrderRow = orders::table
            .find(order_id)
            .first(&mut conn)
            .await
            .optional()?
            .ok_or(OrderError::OrderNotFound)?;
        load_details(&mut conn, order).await
    }

    async fn confirm_order(
        &self,
        order_id: Uuid,
        payment_succeeds: bool,
    ) -> Result<ConfirmOutcome, OrderError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<ConfirmOutcome, OrderError, _>(|conn| {
            Box::pin(async move {
                let order: OrderRow = orders::table
                    .find(order_id)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(OrderError::OrderNotFound)?;

                match order.status() {
                    OrderStatus::Confirmed => {
                        let details = load_details(conn, order).await?;
                        Ok(ConfirmOutcome::AlreadyConfirmed(details))
                    }
                    OrderStatus::Cancelled => Err(OrderError::InvalidStateTransition {
                        status: "CANCELLED",
                        attempted: "confirm",
                    }),
                    OrderStatus::Pending if !payment_succeeds => {
                        diesel::update(payments::table.filter(payments::order_id.eq(order.id)))
                            .set((
                                payments::status.eq(PaymentStatus::Failed.as_str()),
                                payments::updated_at.eq(Utc::now()),
                            ))
                            .execute(conn)
                            .await?;
                        let details = load_details(conn, order).await?;
                        Ok(ConfirmOutcome::PaymentFailed(details))
                    }
                    OrderStatus::Pending => {
                        diesel::update(payments::table.filter(payments::order_id.eq(order.id)))
                            .set((
                                payments::status.eq(PaymentStatus::Succeeded.as_str()),
                                payments::updated_at.eq(Utc::now()),
                            ))
                            .execute(conn)
                            .await?;
                        diesel::update(orders::table.find(order.id))
                            .set((
                                orders::status.eq(OrderStatus::Confirmed.as_str()),
                                orders::updated_at.eq(Utc::now()),
                            ))
                            .execute(conn)
                            .await?;

                        let envelope = EventEnvelope::new(
                            ORDER_CONFIRMED,
                            order.id,
                            &OrderConfirmed {
                                order_id: order.id,
                                hold_id: order.hold_id,
                                customer_email: order.customer_email.clone(),
                                total_amount: format!("{:.2}", order.total_amount),
                            },
                        )
                        .map_err(|e| OrderError::Unavailable(Box::new(e)))?;
                        diesel::insert_into(outbox_events::table)
                            .values(&outbox_row(&envelope))
                            .execute(conn)
                            .await?;

                        let order: OrderRow = orders::table.find(order_id).first(conn).await?;
                        let details = load_details(conn, order).await?;
                        Ok(ConfirmOutcome::Confirmed(details))
                    }
                }
            })
        })
        .await
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<CancelOutcome, OrderError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<CancelOutcome, OrderError, _>(|conn| {
            Box::pin(async move {
                let order: OrderRow = orders::table
                    .find(order_id)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(OrderError::OrderNotFound)?;

                match order.status() {
                    OrderStatus::Cancelled => {
                        let details = load_details(conn, order).await?;
                        Ok(CancelOutcome::AlreadyCancelled(details))
                    }
                    OrderStatus::Confirmed => Err(OrderError::InvalidStateTransition {
                        status: "CONFIRMED",
                        attempted: "cancel",
                    }),
                    OrderStatus::Pending => {
                        diesel::update(orders::table.find(order.id))
                            .set((
                                orders::status.eq(OrderStatus::Cancelled.as_str()),
                                orders::updated_at.eq(Utc::now()),
                            ))
                            .execute(conn)
                            .await?;

                        let envelope = EventEnvelope::new(
                            ORDER_CANCELLED,
                            order.id,
                            &OrderCancelled {
                                order_id: order.id,
                                hold_id: order.hold_id,
                            },
                        )
                        .map_err(|e| OrderError::Unavailable(Box::new(e)))?;
                        diesel::insert_into(outbox_events::table)
                            .values(&outbox_row(&envelope))
                            .execute(conn)
                            .await?;

                        let order: OrderRow = orders::table.find(order_id).first(conn).await?;
                        let details = load_details(conn, order).await?;
                        Ok(CancelOutcome::Cancelled(details))
                    }
                }
            })
        })
        .await
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, OrderError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_events::table
            .filter(outbox_events::published.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<OutboxEvent>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), OrderError> {
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
