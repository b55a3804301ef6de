use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::service::{CreateOrderCommand, OrderLineInput, OrderService};
use crate::store::{OrderDetails, OrderError};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub customer_email: String,
    pub hold_id: Uuid,
    pub items: Vec<OrderItemBody>,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemBody {
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: String,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub status: String,
    pub customer_email: String,
    pub hold_id: Uuid,
    pub total_amount: String,
    pub items: Vec<OrderItemResponse>,
    pub payment: PaymentResponse,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub status: String,
    pub amount: String,
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        Self {
            order_id: details.order.id,
            status: details.order.status().as_str().to_lowercase(),
            customer_email: details.order.customer_email.clone(),
            hold_id: details.order.hold_id,
            total_amount: format!("{:.2}", details.order.total_amount),
            items: details
                .items
                .iter()
                .map(|item| OrderItemResponse {
                    session_id: item.session_id,
                    ticket_type_id: item.ticket_type_id,
                    quantity: item.quantity,
                    unit_price: format!("{:.2}", item.unit_price),
                })
                .collect(),
            payment: PaymentResponse {
                status: details.payment.status().as_str().to_lowercase(),
                amount: format!("{:.2}", details.payment.amount),
            },
            created_at: details.order.created_at,
        }
    }
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: OrderError) -> ApiError {
    match err {
        OrderError::OrderNotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "order_not_found"})),
        ),
        OrderError::InvalidStateTransition { .. } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_state"})),
        ),
        OrderError::PaymentFailed => (
            StatusCode::PAYMENT_REQUIRED,
            Json(serde_json::json!({"error": "payment_failed"})),
        ),
        OrderError::Validation(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "validation_failed", "detail": e.to_string()})),
        ),
        OrderError::Unavailable(source) => {
            tracing::error!("Order storage failure: {}", source);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "service_unavailable"})),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/confirm", post(confirm_order))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "missing_idempotency_key"})),
        ))?;

    let result = state
        .service
        .create(CreateOrderCommand {
            idempotency_key: idempotency_key.to_owned(),
            customer_email: body.customer_email,
            hold_id: body.hold_id,
            items: body
                .items
                .into_iter()
                .map(|item| OrderLineInput {
                    session_id: item.session_id,
                    ticket_type_id: item.ticket_type_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        })
        .await
        .map_err(error_response)?;

    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result.details.into())))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let details = state.service.get(order_id).await.map_err(error_response)?;
    Ok(Json(details.into()))
}

pub async fn confirm_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let details = state
        .service
        .confirm(order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(details.into()))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let details = state
        .service
        .cancel(order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(details.into()))
}

pub async fn health_check() -> &'static str {
    "OK"
}
