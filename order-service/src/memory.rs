//! In-memory store double mirroring the Postgres semantics, used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use shared::{EventEnvelope, OrderCancelled, OrderConfirmed, ORDER_CANCELLED, ORDER_CONFIRMED};
use uuid::Uuid;

use crate::models::*;
use crate::store::{
    CancelOutcome, ConfirmOutcome, CreateResult, NewOrder, OrderDetails, OrderError, OrderStore,
};

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, OrderDetails>,
    by_key: HashMap<String, Uuid>,
    outbox: Vec<OutboxEvent>,
}

#[derive(Default)]
pub struct MemoryOrderStore {
    state: Mutex<State>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    pub fn outbox_types(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .outbox
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
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
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<CreateResult, OrderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.by_key.get(&order.idempotency_key) {
            return Ok(CreateResult {
                details: state.orders[existing_id].clone(),
                created: false,
            });
        }

        let now = Utc::now();
        let details = OrderDetails {
            order: OrderRow {
                id: order.order_id,
                customer_email: order.customer_email.clone(),
                status: OrderStatus::Pending.as_str().to_owned(),
                total_amount: order.total_amount.clone(),
                idempotency_key: order.idempotency_key.clone(),
                hold_id: order.hold_id,
                created_at: now,
                updated_at: now,
            },
            items: order
                .lines
                .iter()
                .map(|line| OrderItemRow {
                    id: Uuid::new_v4(),
                    order_id: order.order_id,
                    session_id: line.session_id,
                    ticket_type_id: line.ticket_type_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price.clone(),
                    created_at: now,
                })
                .collect(),
            payment: PaymentRow {
                id: Uuid::new_v4(),
                order_id: order.order_id,
                status: PaymentStatus::Pending.as_str().to_owned(),
                amount: order.total_amount.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        state.by_key.insert(order.idempotency_key, order.order_id);
        state.orders.insert(order.order_id, details.clone());
        Ok(CreateResult {
            details,
            created: true,
        })
    }

    async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, OrderError> {
        self.state
            .lock()
            .unwrap()
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(OrderError::OrderNotFound)
    }

    async fn confirm_order(
        &self,
        order_id: Uuid,
        payment_succeeds: bool,
    ) -> Result<ConfirmOutcome, OrderError> {
        let mut state = self.state.lock().unwrap();
        let details = state
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::OrderNotFound)?;

        match details.order.status() {
            OrderStatus::Confirmed => Ok(ConfirmOutcome::AlreadyConfirmed(details.clone())),
            OrderStatus::Cancelled => Err(OrderError::InvalidStateTransition {
                status: "CANCELLED",
                attempted: "confirm",
            }),
            OrderStatus::Pending if !payment_succeeds => {
                details.payment.status = PaymentStatus::Failed.as_str().to_owned();
                details.payment.updated_at = Utc::now();
                Ok(ConfirmOutcome::PaymentFailed(details.clone()))
            }
            OrderStatus::Pending => {
                details.payment.status = PaymentStatus::Succeeded.as_str().to_owned();
                details.payment.updated_at = Utc::now();
                details.order.status = OrderStatus::Confirmed.as_str().to_owned();
                details.order.updated_at = Utc::now();
                let snapshot = details.clone();

                let envelope = EventEnvelope::new(
                    ORDER_CONFIRMED,
                    snapshot.order.id,
                    &OrderConfirmed {
                        order_id: snapshot.order.id,
                        hold_id: snapshot.order.hold_id,
                        customer_email: snapshot.order.customer_email.clone(),
                        total_amount: format!("{:.2}", snapshot.order.total_amount),
                    },
                )
                .map_err(|e| OrderError::Unavailable(Box::new(e)))?;
                Self::push_outbox(&mut state, envelope);

                Ok(ConfirmOutcome::Confirmed(snapshot))
            }
        }
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<CancelOutcome, OrderError> {
        let mut state = self.state.lock().unwrap();
        let details = state
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::OrderNotFound)?;

        match details.order.status() {
            OrderStatus::Cancelled => Ok(CancelOutcome::AlreadyCancelled(details.clone())),
            OrderStatus::Confirmed => Err(OrderError::InvalidStateTransition {
                status: "CONFIRMED",
                attempted: "cancel",
            }),
            OrderStatus::Pending => {
                details.order.status = OrderStatus::Cancelled.as_str().to_owned();
                details.order.updated_at = Utc::now();
                let snapshot = details.clone();

                let envelope = EventEnvelope::new(
                    ORDER_CANCELLED,
                    snapshot.order.id,
                    &OrderCancelled {
                        order_id: snapshot.order.id,
                        hold_id: snapshot.order.hold_id,
                    },
                )
                .map_err(|e| OrderError::Unavailable(Box::new(e)))?;
                Self::push_outbox(&mut state, envelope);

                Ok(CancelOutcome::Cancelled(snapshot))
            }
        }
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, OrderError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|e| !e.published)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), OrderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == event_id) {
            event.published = true;
            event.published_at = Some(Utc::now());
        }
        Ok(())
    }
}
