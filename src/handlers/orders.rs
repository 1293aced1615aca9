use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use super::common::{client_ip, created_response, success_response};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        commerce::{PlaceOrderRequest, PlaceOrderResponse},
        orders::{OrderDetail, OrderListQuery, OrderListResponse, UpdateOrderStatusRequest},
    },
    ApiResponse, AppState,
};

const DEFAULT_PER_PAGE: u64 = 20;

/// Place an order from the caller's cart
#[utoipa::path(
    post,
    path = "/api/orders",
    summary = "Place order",
    description = "Convert the caller's cart into an order. ONLINE orders also receive a payment redirect URL.",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<PlaceOrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty cart, insufficient stock, invalid address or voucher", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PlaceOrderResponse>>), ServiceError> {
    let placed = state
        .services
        .checkout
        .place_order(auth_user.user_id, request, &client_ip(&headers))
        .await?;
    Ok(created_response(placed))
}

/// List the caller's orders
#[utoipa::path(
    get,
    path = "/api/orders",
    summary = "List my orders",
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<Vec<OrderDetail>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderDetail>>>, ServiceError> {
    let orders = state.services.orders.list_for_user(auth_user.user_id).await?;
    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    summary = "Get order",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderDetail>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_for_user(auth_user.user_id, id)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancel a PENDING order and return its units to stock",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_for_user(auth_user.user_id, id)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders",
    summary = "List all orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Page of orders", body = ApiResponse<OrderListResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn admin_list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    auth_user.require_admin()?;
    let page = state
        .services
        .orders
        .list_all(
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(DEFAULT_PER_PAGE),
            query.status,
        )
        .await?;
    Ok(success_response(page))
}

#[utoipa::path(
    put,
    path = "/api/admin/orders/{id}/status",
    summary = "Change order status",
    params(("id" = i32, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<OrderDetail>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn admin_update_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    auth_user.require_admin()?;
    let order = state
        .services
        .orders
        .update_status(id, request.status)
        .await?;
    Ok(success_response(order))
}
