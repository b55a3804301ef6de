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

use crate::catalog::{CatalogError, CatalogService, EventView, SessionView};
use crate::clients::OrderApi;
use crate::service::{CreateHoldCommand, HoldService, HoldServiceError};
use crate::store::HoldStoreError;

#[derive(Clone)]
pub struct AppState {
    pub holds: Arc<HoldService>,
    pub catalog: Arc<CatalogService>,
    pub orders: Arc<dyn OrderApi>,
}

#[derive(Debug, Deserialize)]
pub struct CreateHoldBody {
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub customer_email: String,
}

#[derive(Debug, Serialize)]
pub struct HoldCreatedResponse {
    pub hold_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn hold_error_response(err: HoldServiceError) -> ApiError {
    match err {
        HoldServiceError::InsufficientInventory { available_quantity } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "success": false,
                "error": "insufficient_inventory",
                "available_quantity": available_quantity,
            })),
        ),
        HoldServiceError::ItemNotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "item_not_found"})),
        ),
        HoldServiceError::InventoryUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "inventory_service_unavailable"})),
        ),
        HoldServiceError::Validation(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "validation_failed", "detail": e.to_string()})),
        ),
        HoldServiceError::Storage(HoldStoreError::Validation(e)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "validation_failed", "detail": e.to_string()})),
        ),
        HoldServiceError::Storage(source) => {
            tracing::error!("Hold storage failure: {}", source);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "service_unavailable"})),
            )
        }
    }
}

fn catalog_error_response(err: CatalogError) -> ApiError {
    match err {
        CatalogError::EventNotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "event_not_found"})),
        ),
        CatalogError::Validation(_) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_event_id"})),
        ),
        CatalogError::Unavailable(source) => {
            tracing::error!("Catalog storage failure: {}", source);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "service_unavailable"})),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/holds", post(create_hold))
        .route("/api/checkout", post(checkout))
        .route("/api/events", get(list_events))
        .route("/api/events/:event_id", get(get_event))
        .route("/api/events/:event_id/sessions", get(list_sessions))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_hold(
    State(state): State<AppState>,
    Json(body): Json<CreateHoldBody>,
) -> Result<(StatusCode, Json<HoldCreatedResponse>), ApiError> {
    let view = state
        .holds
        .create_hold(CreateHoldCommand {
            session_id: body.session_id,
            ticket_type_id: body.ticket_type_id,
            quantity: body.quantity,
            customer_email: body.customer_email,
        })
        .await
        .map_err(hold_error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(HoldCreatedResponse {
            hold_id: view.hold_id,
            expires_at: view.expires_at,
        }),
    ))
}

pub async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "missing_idempotency_key"})),
        ))?;

    match state.orders.create_order(idempotency_key, &body).await {
        Ok((status, payload)) => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok((status, Json(payload)))
        }
        Err(_) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "order_service_unavailable"})),
        )),
    }
}

pub async fn list_events(
    State(state): State<AppState>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let events = state
        .catalog
        .list_events()
        .await
        .map_err(catalog_error_response)?;
    Ok(Json(events))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<EventView>, ApiError> {
    let event = state
        .catalog
        .get_event(&event_id)
        .await
        .map_err(catalog_error_response)?;
    Ok(Json(event))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = state
        .catalog
        .sessions_for_event(&event_id)
        .await
        .map_err(catalog_error_response)?;
    Ok(Json(sessions))
}

pub async fn health_check() -> &'static str {
    "OK"
}
