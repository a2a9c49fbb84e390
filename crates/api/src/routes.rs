//! HTTP surface of the order service.
//!
//! The route layer is the only place domain errors become status codes, and
//! every failure body has the same shape: `{ "error": <message> }`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::debug;

use orderflow_common::context::RequestContext;
use orderflow_domain::{CreateOrderRequest, OrderError};

use crate::service::OrderService;

/// Shared state handed to every handler.
pub struct AppContext {
    pub orders: OrderService,
}

/// Build the service router.
pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/health", get(health))
        .with_state(context)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// `POST /orders` with an optional `Idempotency-Key` header.
async fn create_order(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Response {
    // malformed JSON is a client error, not axum's default 422
    let Json(request) = match body {
        Ok(json) => json,
        Err(rejection) => {
            let error = OrderError::BadInput(rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, &error);
        }
    };

    if let Err(message) = request.validate() {
        let error = OrderError::BadInput(message);
        return error_response(StatusCode::BAD_REQUEST, &error);
    }

    let idempotency_key =
        headers.get("Idempotency-Key").and_then(|value| value.to_str().ok()).unwrap_or("");

    let ctx = RequestContext::new();
    match context.orders.create_order(&ctx, request, idempotency_key).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            debug!(error = %error, kind = error.label(), "request failed");
            let status = StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_response(status, &error)
        }
    }
}

fn error_response(status: StatusCode, error: &OrderError) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
