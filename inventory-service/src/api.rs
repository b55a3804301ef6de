use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::service::{HoldCommand, InventoryService};
use crate::store::{Availability, InventoryError};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InventoryService>,
}

#[derive(Debug, Deserialize)]
pub struct HoldRequestBody {
    pub hold_id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HoldIdBody {
    pub hold_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpsertItemBody {
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub total_quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct HoldAcceptedResponse {
    pub success: bool,
    pub available_quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub held_quantity: i32,
}

impl From<Availability> for ItemResponse {
    fn from(value: Availability) -> Self {
        Self {
            total_quantity: value.total_quantity,
            available_quantity: value.available_quantity,
            held_quantity: value.held_quantity,
        }
    }
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: InventoryError) -> ApiError {
    match err {
        InventoryError::InsufficientInventory { available } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "success": false,
                "error": "insufficient_inventory",
                "available_quantity": available,
            })),
        ),
        InventoryError::ItemNotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "item_not_found"})),
        ),
        InventoryError::HoldNotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "hold_not_found"})),
        ),
        InventoryError::HoldMismatch => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "hold_mismatch"})),
        ),
        InventoryError::InvalidStateTransition { .. } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_state_transition"})),
        ),
        InventoryError::Validation(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "validation_failed", "detail": e.to_string()})),
        ),
        InventoryError::MalformedEvent(_) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "bad_request"})),
        ),
        InventoryError::Unavailable(source) => {
            tracing::error!("Inventory storage failure: {}", source);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "service_unavailable"})),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/inventory/hold", post(hold))
        .route("/inventory/release", post(release))
        .route("/inventory/commit", post(commit))
        .route("/inventory/items", put(upsert_item))
        .route("/inventory/items/:session_id/:ticket_type_id", get(get_item))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn hold(
    State(state): State<AppState>,
    Json(body): Json<HoldRequestBody>,
) -> Result<Json<HoldAcceptedResponse>, ApiError> {
    let accepted = state
        .service
        .hold(HoldCommand {
            hold_id: body.hold_id,
            session_id: body.session_id,
            ticket_type_id: body.ticket_type_id,
            quantity: body.quantity,
            expires_at: body.expires_at,
        })
        .await
        .map_err(error_response)?;
    Ok(Json(HoldAcceptedResponse {
        success: true,
        available_quantity: accepted.available_quantity,
    }))
}

pub async fn release(
    State(state): State<AppState>,
    Json(body): Json<HoldIdBody>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .service
        .release(body.hold_id)
        .await
        .map_err(error_response)?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn commit(
    State(state): State<AppState>,
    Json(body): Json<HoldIdBody>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .service
        .commit(body.hold_id)
        .await
        .map_err(error_response)?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn upsert_item(
    State(state): State<AppState>,
    Json(body): Json<UpsertItemBody>,
) -> Result<Json<ItemResponse>, ApiError> {
    let availability = state
        .service
        .upsert_item(body.session_id, body.ticket_type_id, body.total_quantity)
        .await
        .map_err(error_response)?;
    Ok(Json(availability.into()))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path((session_id, ticket_type_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ItemResponse>, ApiError> {
    let availability = state
        .service
        .availability(session_id, ticket_type_id)
        .await
        .map_err(error_response)?;
    Ok(Json(availability.into()))
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryInventoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_app() -> (Router, Arc<InventoryService>, Uuid, Uuid) {
        let store = Arc::new(MemoryInventoryStore::new());
        let service = Arc::new(InventoryService::new(store));
        let session = Uuid::new_v4();
        let ticket_type = Uuid::new_v4();
        service.upsert_item(session, ticket_type, 2).await.unwrap();
        let app = create_router(AppState {
            service: service.clone(),
        });
        (app, service, session, ticket_type)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn hold_conflict_reports_availability() {
        let (app, _, session, ticket_type) = test_app().await;
        let request = post_json(
            "/inventory/hold",
            serde_json::json!({
                "hold_id": Uuid::new_v4(),
                "session_id": session,
                "ticket_type_id": ticket_type,
                "quantity": 5,
                "expires_at": Utc::now(),
            }),
        );

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "insufficient_inventory");
        assert_eq!(body["available_quantity"], 2);
    }

    #[tokio::test]
    async fn unknown_item_is_404() {
        let (app, _, _, _) = test_app().await;
        let request = Request::builder()
            .uri(format!(
                "/inventory/items/{}/{}",
                Uuid::new_v4(),
                Uuid::new_v4()
            ))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn hold_then_lookup_shows_held_quantity() {
        let (app, _, session, ticket_type) = test_app().await;
        let response = app
            .clone()
            .oneshot(post_json(
                "/inventory/hold",
                serde_json::json!({
                    "hold_id": Uuid::new_v4(),
                    "session_id": session,
                    "ticket_type_id": ticket_type,
                    "quantity": 1,
                    "expires_at": Utc::now(),
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/inventory/items/{session}/{ticket_type}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total_quantity"], 2);
        assert_eq!(body["available_quantity"], 1);
        assert_eq!(body["held_quantity"], 1);
    }
}
