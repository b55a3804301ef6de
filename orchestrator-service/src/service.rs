use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use shared::{EmailAddress, HoldId, Quantity, ValidationError};

use crate::clients::{ClientError, InventoryClient, InventoryHoldRequest, InventoryHoldResponse};
use crate::store::{HoldStore, HoldStoreError, NewHold};

/// Inventory API seam so tests can stand in for the HTTP client.
#[async_trait]
pub trait InventoryApi: Send + Sync {
    async fn hold(
        &self,
        request: &InventoryHoldRequest,
    ) -> Result<InventoryHoldResponse, ClientError>;
}

#[async_trait]
impl InventoryApi for InventoryClient {
    async fn hold(
        &self,
        request: &InventoryHoldRequest,
    ) -> Result<InventoryHoldResponse, ClientError> {
        InventoryClient::hold(self, request).await
    }
}

#[derive(Debug, Error)]
pub enum HoldServiceError {
    #[error("insufficient inventory: {available_quantity} available")]
    InsufficientInventory { available_quantity: i32 },
    #[error("inventory item not found")]
    ItemNotFound,
    #[error("inventory service unavailable")]
    InventoryUnavailable,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] HoldStoreError),
}

#[derive(Debug, Clone)]
pub struct CreateHoldCommand {
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub customer_email: String,
}

#[derive(Debug, Clone, Copy)]
pub struct HoldCreatedView {
    pub hold_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub struct HoldService {
    store: Arc<dyn HoldStore>,
    inventory: Arc<dyn InventoryApi>,
    hold_ttl_secs: i64,
}

impl HoldService {
    pub fn new(
        store: Arc<dyn HoldStore>,
        inventory: Arc<dyn InventoryApi>,
        hold_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            inventory,
            hold_ttl_secs,
        }
    }

    /// Mint a hold: mirror row first, then the synchronous inventory call.
    /// The ordering means a lost call can only leave an ACTIVE mirror row,
    /// which the expiry loop cleans up through the idempotent release path.
    pub async fn create_hold(
        &self,
        command: CreateHoldCommand,
    ) -> Result<HoldCreatedView, HoldServiceError> {
        let email = EmailAddress::new(&command.customer_email)?;
        let quantity = Quantity::new(command.quantity)?;

        let hold_id = HoldId::generate();
        let expires_at = Utc::now() + Duration::seconds(self.hold_ttl_secs);

        self.store
            .create_hold(NewHold {
                hold_id: hold_id.as_uuid(),
                session_id: command.session_id,
                ticket_type_id: command.ticket_type_id,
                quantity: quantity.get(),
                customer_email: email.as_str().to_owned(),
                expires_at,
            })
            .await?;

        let request = InventoryHoldRequest {
            hold_id: hold_id.as_uuid(),
            session_id: command.session_id,
            ticket_type_id: command.ticket_type_id,
            quantity: quantity.get(),
            expires_at,
        };

        match self.inventory.hold(&request).await {
            Ok(response) => {
                info!(
                    "Hold {} placed for {}, {} remaining downstream",
                    hold_id, email, response.available_quantity
                );
                Ok(HoldCreatedView {
                    hold_id: hold_id.as_uuid(),
                    expires_at,
                })
            }
            Err(ClientError::InsufficientInventory { available_quantity }) => {
                self.discard_mirror(hold_id.as_uuid()).await;
                Err(HoldServiceError::InsufficientInventory { available_quantity })
            }
            Err(ClientError::ItemNotFound) => {
                self.discard_mirror(hold_id.as_uuid()).await;
                Err(HoldServiceError::ItemNotFound)
            }
            Err(err @ (ClientError::Unavailable { .. } | ClientError::Unexpected { .. })) => {
                // The hold may or may not exist downstream. Leave the mirror
                // row: expiry will emit hold.expired and release is a no-op
                // for a hold inventory never saw.
                warn!("Inventory call for hold {} failed: {}", hold_id, err);
                Err(HoldServiceError::InventoryUnavailable)
            }
        }
    }

    async fn discard_mirror(&self, hold_id: Uuid) {
        if let Err(e) = self.store.discard_hold(hold_id).await {
            // Not fatal: the row is ACTIVE and will drain through expiry.
            warn!("Failed to discard mirror hold {}: {}", hold_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHoldStore;
    use crate::models::HoldRecordStatus;
    use std::sync::Mutex;

    struct StubInventory {
        responses: Mutex<Vec<Result<InventoryHoldResponse, ClientError>>>,
    }

    impl StubInventory {
        fn replying(result: Result<InventoryHoldResponse, ClientError>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![result]),
            })
        }
    }

    #[async_trait]
    impl InventoryApi for StubInventory {
        async fn hold(
            &self,
            _request: &InventoryHoldRequest,
        ) -> Result<InventoryHoldResponse, ClientError> {
            self.responses.lock().unwrap().pop().expect("stub exhausted")
        }
    }

    fn command() -> CreateHoldCommand {
        CreateHoldCommand {
            session_id: Uuid::new_v4(),
            ticket_type_id: Uuid::new_v4(),
            quantity: 2,
            customer_email: "u@example.com".to_owned(),
        }
    }

    #[tokio::test]
    async fn successful_hold_keeps_the_mirror_active() {
        let store = Arc::new(MemoryHoldStore::new());
        let inventory = StubInventory::replying(Ok(InventoryHoldResponse {
            success: true,
            available_quantity: 98,
        }));
        let service = HoldService::new(store.clone(), inventory, 600);

        let view = service.create_hold(command()).await.unwrap();
        assert!(view.expires_at > Utc::now() + Duration::seconds(590));

        let record = store.get_hold(view.hold_id).await.unwrap();
        assert_eq!(record.status(), HoldRecordStatus::Active);
        assert_eq!(record.quantity, 2);
    }

    #[tokio::test]
    async fn insufficient_inventory_discards_the_mirror() {
        let store = Arc::new(MemoryHoldStore::new());
        let inventory = StubInventory::replying(Err(ClientError::InsufficientInventory {
            available_quantity: 1,
        }));
        let service = HoldService::new(store.clone(), inventory, 600);

        let err = service.create_hold(command()).await.unwrap_err();
        assert!(matches!(
            err,
            HoldServiceError::InsufficientInventory {
                available_quantity: 1
            }
        ));
        assert_eq!(store.hold_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_inventory_leaves_the_mirror_for_expiry() {
        let store = Arc::new(MemoryHoldStore::new());
        let inventory = StubInventory::replying(Err(ClientError::Unavailable {
            service: "inventory",
        }));
        let service = HoldService::new(store.clone(), inventory, 600);

        let err = service.create_hold(command()).await.unwrap_err();
        assert!(matches!(err, HoldServiceError::InventoryUnavailable));
        assert_eq!(store.hold_count(), 1);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_inventory() {
        let store = Arc::new(MemoryHoldStore::new());
        let inventory = Arc::new(StubInventory {
            responses: Mutex::new(Vec::new()),
        });
        let service = HoldService::new(store.clone(), inventory, 600);

        let mut bad_email = command();
        bad_email.customer_email = "nope".to_owned();
        assert!(matches!(
            service.create_hold(bad_email).await.unwrap_err(),
            HoldServiceError::Validation(_)
        ));

        let mut bad_quantity = command();
        bad_quantity.quantity = 0;
        assert!(matches!(
            service.create_hold(bad_quantity).await.unwrap_err(),
            HoldServiceError::Validation(_)
        ));
        assert_eq!(store.hold_count(), 0);
    }
}
