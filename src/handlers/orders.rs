use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{
        CreateOrderRequest, OrderStatus, UpdateOrderStatusRequest,
    },
    ApiResponse, AppState, ListQuery,
};

/// Routes for order creation, retrieval and fulfillment transitions.
/// Everything here requires a bearer token; ownership checks live in the
/// service layer. Deletion is mounted separately with the admin role.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
        .route("/:id/cancel", post(cancel_order))
}

pub fn order_admin_routes() -> Router<AppState> {
    Router::new().route("/:id", axum::routing::delete(delete_order))
}

// POST /api/v1/orders
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created"),
        (status = 400, description = "Invalid line items or address", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Referenced product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.create_order(&user, payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("page" = Option<u64>, Query, description = "Page number (1-based)"),
        ("limit" = Option<u64>, Query, description = "Page size")
    ),
    responses(
        (status = 200, description = "Orders for the requesting user (all orders for admins)"),
        (status = 401, description = "Missing or invalid token")
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(&user, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

// GET /api/v1/orders/{id}
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with line items"),
        (status = 403, description = "Requester is neither owner nor admin", body = crate::errors::ErrorResponse),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(&user, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

// PUT /api/v1/orders/{id}/status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order after transition"),
        (status = 403, description = "Transition not allowed for requester", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition violates the order state machine", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_order_status(&user, id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

// POST /api/v1/orders/{id}/cancel
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Cancelled order"),
        (status = 409, description = "Order is paid or already terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_order_status(&user, id, OrderStatus::Cancelled)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

// DELETE /api/v1/orders/{id}  (admin cleanup)
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order removed"),
        (status = 403, description = "Requester is not an administrator"),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.orders.delete_order(&user, id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "deleted": id,
    }))))
}
