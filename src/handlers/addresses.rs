use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser, errors::ServiceError, services::addresses::AddressInput, ApiResponse, AppState,
};

/// Address-book routes. All operations are scoped to the requesting user.
pub fn address_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_address).get(list_addresses))
        .route("/:id", put(update_address).delete(delete_address))
        .route("/:id/default", post(set_default_address))
}

// POST /api/v1/addresses
#[utoipa::path(
    post,
    path = "/api/v1/addresses",
    request_body = AddressInput,
    responses(
        (status = 201, description = "Address created; first address becomes the default"),
        (status = 400, description = "Missing required fields", body = crate::errors::ErrorResponse)
    ),
    tag = "Addresses"
)]
pub async fn create_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddressInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let address = state
        .services
        .addresses
        .create_address(&user, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(address))))
}

// GET /api/v1/addresses
#[utoipa::path(
    get,
    path = "/api/v1/addresses",
    responses((status = 200, description = "Addresses for the requesting user, default first")),
    tag = "Addresses"
)]
pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let addresses = state.services.addresses.list_addresses(&user).await?;
    Ok(Json(ApiResponse::success(addresses)))
}

// PUT /api/v1/addresses/{id}
#[utoipa::path(
    put,
    path = "/api/v1/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    request_body = AddressInput,
    responses(
        (status = 200, description = "Updated address"),
        (status = 404, description = "No such address for this user", body = crate::errors::ErrorResponse)
    ),
    tag = "Addresses"
)]
pub async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddressInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let address = state
        .services
        .addresses
        .update_address(&user, id, payload)
        .await?;
    Ok(Json(ApiResponse::success(address)))
}

// DELETE /api/v1/addresses/{id}
#[utoipa::path(
    delete,
    path = "/api/v1/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    responses(
        (status = 200, description = "Address removed; default reassigned if needed"),
        (status = 404, description = "No such address for this user", body = crate::errors::ErrorResponse)
    ),
    tag = "Addresses"
)]
pub async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.addresses.delete_address(&user, id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "deleted": id,
    }))))
}

// POST /api/v1/addresses/{id}/default
#[utoipa::path(
    post,
    path = "/api/v1/addresses/{id}/default",
    params(("id" = Uuid, Path, description = "Address id")),
    responses(
        (status = 200, description = "Address is now the user's default"),
        (status = 404, description = "No such address for this user", body = crate::errors::ErrorResponse)
    ),
    tag = "Addresses"
)]
pub async fn set_default_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let address = state.services.addresses.set_default(&user, id).await?;
    Ok(Json(ApiResponse::success(address)))
}
