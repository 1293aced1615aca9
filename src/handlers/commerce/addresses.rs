use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};

use crate::handlers::common::{created_response, success_response};
use crate::{
    auth::AuthUser, entities::commerce::address, errors::ServiceError,
    services::commerce::AddressInput, ApiResponse, AppState,
};

/// Nested under `/api/addresses`
pub fn addresses_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_addresses).post(create_address))
        .route("/:id", put(update_address).delete(delete_address))
        .route("/:id/default", post(set_default_address))
}

#[utoipa::path(
    get,
    path = "/api/addresses",
    summary = "List my addresses",
    responses(
        (status = 200, description = "Addresses, default first", body = ApiResponse<Vec<address::Model>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "addresses"
)]
pub async fn list_addresses(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<address::Model>>>, ServiceError> {
    let addresses = state.services.addresses.list(auth_user.user_id).await?;
    Ok(success_response(addresses))
}

#[utoipa::path(
    post,
    path = "/api/addresses",
    summary = "Add address",
    request_body = AddressInput,
    responses(
        (status = 201, description = "Address created", body = ApiResponse<address::Model>),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "addresses"
)]
pub async fn create_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(input): Json<AddressInput>,
) -> Result<(StatusCode, Json<ApiResponse<address::Model>>), ServiceError> {
    let created = state
        .services
        .addresses
        .create(auth_user.user_id, input)
        .await?;
    Ok(created_response(created))
}

#[utoipa::path(
    put,
    path = "/api/addresses/{id}",
    summary = "Edit address",
    description = "Orders already placed keep the snapshot taken at checkout",
    params(("id" = i32, Path, description = "Address id")),
    request_body = AddressInput,
    responses(
        (status = 200, description = "Address updated", body = ApiResponse<address::Model>),
        (status = 404, description = "Address not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "addresses"
)]
pub async fn update_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<AddressInput>,
) -> Result<Json<ApiResponse<address::Model>>, ServiceError> {
    let updated = state
        .services
        .addresses
        .update(auth_user.user_id, id, input)
        .await?;
    Ok(success_response(updated))
}

#[utoipa::path(
    post,
    path = "/api/addresses/{id}/default",
    summary = "Make address the default",
    params(("id" = i32, Path, description = "Address id")),
    responses(
        (status = 200, description = "Default changed", body = ApiResponse<address::Model>),
        (status = 404, description = "Address not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "addresses"
)]
pub async fn set_default_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<address::Model>>, ServiceError> {
    let updated = state
        .services
        .addresses
        .set_default(auth_user.user_id, id)
        .await?;
    Ok(success_response(updated))
}

#[utoipa::path(
    delete,
    path = "/api/addresses/{id}",
    summary = "Delete address",
    params(("id" = i32, Path, description = "Address id")),
    responses(
        (status = 200, description = "Address deleted"),
        (status = 404, description = "Address not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "addresses"
)]
pub async fn delete_address(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    state
        .services
        .addresses
        .delete(auth_user.user_id, id)
        .await?;
    Ok(Json(
        ApiResponse::success(json!({ "id": id })).with_message("address deleted"),
    ))
}
