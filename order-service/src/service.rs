use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use shared::{EmailAddress, IdempotencyKey, Money, OrderId, Quantity, ValidationError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{
    CancelOutcome, ConfirmOutcome, CreateResult, NewOrder, NewOrderLine, OrderDetails, OrderError,
    OrderStore,
};

/// Payment integration point. Real processing is out of scope; the stub
/// always approves unless the fault-injection hook flips it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, order_id: Uuid, amount: &BigDecimal) -> bool;
}

pub struct StubPaymentGateway {
    fail_all: bool,
}

impl StubPaymentGateway {
    pub fn new(fail_all: bool) -> Self {
        Self { fail_all }
    }
}

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn charge(&self, order_id: Uuid, amount: &BigDecimal) -> bool {
        if self.fail_all {
            warn!("Declining payment of {:.2} for order {}", amount, order_id);
            return false;
        }
        info!("Charged {:.2} for order {}", amount, order_id);
        true
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub idempotency_key: String,
    pub customer_email: String,
    pub hold_id: Uuid,
    pub items: Vec<OrderLineInput>,
}

#[derive(Debug, Clone)]
pub struct OrderLineInput {
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: String,
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn create(&self, command: CreateOrderCommand) -> Result<CreateResult, OrderError> {
        let key = IdempotencyKey::new(&command.idempotency_key)?;
        let email = EmailAddress::new(&command.customer_email)?;
        if command.items.is_empty() {
            return Err(ValidationError::EmptyOrder.into());
        }

        let mut total = Money::zero();
        let mut lines = Vec::with_capacity(command.items.len());
        for item in &command.items {
            let quantity = Quantity::new(item.quantity)?;
            let unit_price = Money::parse(&item.unit_price)?;
            total = total.plus(&unit_price.times(quantity));
            lines.push(NewOrderLine {
                session_id: item.session_id,
                ticket_type_id: item.ticket_type_id,
                quantity: quantity.get(),
                unit_price: unit_price.into_amount(),
            });
        }

        let result = self
            .store
            .create_order(NewOrder {
                order_id: OrderId::generate().as_uuid(),
                idempotency_key: key.as_str().to_owned(),
                customer_email: email.as_str().to_owned(),
                hold_id: command.hold_id,
                total_amount: total.into_amount(),
                lines,
            })
            .await?;

        if result.created {
            info!(
                "Order {} created for hold {} ({} line(s))",
                result.details.order.id,
                command.hold_id,
                result.details.items.len()
            );
        } else {
            info!(
                "Idempotency key {} matched order {}, returning it",
                key, result.details.order.id
            );
        }
        Ok(result)
    }

    pub async fn confirm(&self, order_id: Uuid) -> Result<OrderDetails, OrderError> {
        let details = self.store.get_order(order_id).await?;
        let paid = if details.order.status().can_confirm() {
            self.gateway
                .charge(order_id, &details.order.total_amount)
                .await
        } else {
            true
        };

        match self.store.confirm_order(order_id, paid).await? {
            ConfirmOutcome::Confirmed(details) => {
                info!("Order {} confirmed", order_id);
                Ok(details)
            }
            ConfirmOutcome::AlreadyConfirmed(details) => {
                info!("Order {} already confirmed", order_id);
                Ok(details)
            }
            ConfirmOutcome::PaymentFailed(_) => {
                warn!("Payment failed for order {}, order stays pending", order_id);
                Err(OrderError::PaymentFailed)
            }
        }
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<OrderDetails, OrderError> {
        match self.store.cancel_order(order_id).await? {
            CancelOutcome::Cancelled(details) => {
                info!("Order {} cancelled", order_id);
                Ok(details)
            }
            CancelOutcome::AlreadyCancelled(details) => Ok(details),
        }
    }

    pub async fn get(&self, order_id: Uuid) -> Result<OrderDetails, OrderError> {
        self.store.get_order(order_id).await
    }
}
