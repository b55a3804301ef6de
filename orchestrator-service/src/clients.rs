//! Typed HTTP clients for the downstream services. Calls are bounded by the
//! configured timeout; transport failures and 503s get one jittered retry
//! before surfacing as `Unavailable`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("insufficient inventory: {available_quantity} available")]
    InsufficientInventory { available_quantity: i32 },
    #[error("inventory item not found")]
    ItemNotFound,
    #[error("{service} service unavailable")]
    Unavailable { service: &'static str },
    #[error("unexpected {status} from {service} service")]
    Unexpected {
        service: &'static str,
        status: u16,
    },
}

async fn retry_delay() {
    let jitter = rand::thread_rng().gen_range(50..250);
    tokio::time::sleep(Duration::from_millis(jitter)).await;
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryHoldRequest {
    pub hold_id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryHoldResponse {
    pub success: bool,
    pub available_quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct InventoryConflictResponse {
    available_quantity: i32,
}

#[derive(Clone)]
pub struct InventoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl InventoryClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub async fn hold(
        &self,
        request: &InventoryHoldRequest,
    ) -> Result<InventoryHoldResponse, ClientError> {
        let url = format!("{}/inventory/hold", self.base_url);

        for attempt in 0..2 {
            let response = match self.http.post(&url).json(request).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Inventory call failed (attempt {}): {}", attempt + 1, e);
                    if attempt == 0 {
                        retry_delay().await;
                        continue;
                    }
                    return Err(ClientError::Unavailable {
                        service: "inventory",
                    });
                }
            };

            match response.status() {
                StatusCode::OK => {
                    return response.json::<InventoryHoldResponse>().await.map_err(|_| {
                        ClientError::Unexpected {
                            service: "inventory",
                            status: 200,
                        }
                    });
                }
                StatusCode::CONFLICT => {
                    let body = response
                        .json::<InventoryConflictResponse>()
                        .await
                        .map_err(|_| ClientError::Unexpected {
                            service: "inventory",
                            status: 409,
                        })?;
                    return Err(ClientError::InsufficientInventory {
                        available_quantity: body.available_quantity,
                    });
                }
                StatusCode::NOT_FOUND => return Err(ClientError::ItemNotFound),
                StatusCode::SERVICE_UNAVAILABLE if attempt == 0 => {
                    retry_delay().await;
                    continue;
                }
                StatusCode::SERVICE_UNAVAILABLE => {
                    return Err(ClientError::Unavailable {
                        service: "inventory",
                    })
                }
                status => {
                    return Err(ClientError::Unexpected {
                        service: "inventory",
                        status: status.as_u16(),
                    })
                }
            }
        }

        Err(ClientError::Unavailable {
            service: "inventory",
        })
    }
}

/// Order API seam so tests can stand in for the HTTP client.
#[async_trait::async_trait]
pub trait OrderApi: Send + Sync {
    async fn create_order(
        &self,
        idempotency_key: &str,
        body: &serde_json::Value,
    ) -> Result<(u16, serde_json::Value), ClientError>;
}

#[async_trait::async_trait]
impl OrderApi for OrderClient {
    async fn create_order(
        &self,
        idempotency_key: &str,
        body: &serde_json::Value,
    ) -> Result<(u16, serde_json::Value), ClientError> {
        OrderClient::create_order(self, idempotency_key, body).await
    }
}

/// Checkout pass-through. The order service owns the response shape; this
/// client only relays status and body.
#[derive(Clone)]
pub struct OrderClient {
    http: reqwest::Client,
    base_url: String,
}

impl OrderClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub async fn create_order(
        &self,
        idempotency_key: &str,
        body: &serde_json::Value,
    ) -> Result<(u16, serde_json::Value), ClientError> {
        let url = format!("{}/orders", self.base_url);

        for attempt in 0..2 {
            let response = match self
                .http
                .post(&url)
                .header("Idempotency-Key", idempotency_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    // Creation is idempotent by key, so a retry is safe.
                    warn!("Order call failed (attempt {}): {}", attempt + 1, e);
                    if attempt == 0 {
                        retry_delay().await;
                        continue;
                    }
                    return Err(ClientError::Unavailable { service: "order" });
                }
            };

            let status = response.status().as_u16();
            let payload = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or_else(|_| serde_json::json!({}));
            return Ok((status, payload));
        }

        Err(ClientError::Unavailable { service: "order" })
    }
}
