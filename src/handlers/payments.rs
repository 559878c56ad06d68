use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::AuthUser, errors::ServiceError, services::payments::PaymentCallback, ApiResponse,
    AppState,
};

/// Payment routes hang off an order: intent creation, the signed
/// settlement callback, and client-reported provider failures.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/:id/payment/intent", post(create_payment_intent))
        .route("/:id/payment/verify", post(verify_payment))
        .route("/:id/payment/failure", post(report_payment_failure))
}

// POST /api/v1/orders/{id}/payment/intent
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment/intent",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Remote intent (new or reused)"),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is already paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable; safe to retry", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let intent = state.services.payments.create_intent(&user, id).await?;
    Ok(Json(ApiResponse::success(intent)))
}

// POST /api/v1/orders/{id}/payment/verify
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment/verify",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = PaymentCallback,
    responses(
        (status = 200, description = "Settled (or already settled; duplicate callbacks are a no-op success)"),
        (status = 400, description = "Bad signature or mismatched provider order id", body = crate::errors::ErrorResponse),
        (status = 403, description = "Requester does not own the order", body = crate::errors::ErrorResponse),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(callback): Json<PaymentCallback>,
) -> Result<impl IntoResponse, ServiceError> {
    match state
        .services
        .payments
        .verify_and_settle(&user, id, callback)
        .await
    {
        Ok(order) => Ok(Json(ApiResponse::success(json!({
            "status": "success",
            "order_id": order.id,
            "already_settled": false,
        })))),
        // Duplicate delivery of a valid callback: report success without
        // re-running any side effects.
        Err(ServiceError::AlreadyPaid) => Ok(Json(ApiResponse::success(json!({
            "status": "success",
            "order_id": id,
            "already_settled": true,
        })))),
        Err(e) => Err(e),
    }
}

// POST /api/v1/orders/{id}/payment/failure
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment/failure",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled with failed payment"),
        (status = 409, description = "Order is already paid", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn report_payment_failure(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.payments.report_failure(&user, id).await?;
    Ok(Json(ApiResponse::success(order)))
}
