use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};

use crate::entities::commerce::{user_voucher, voucher};
use crate::handlers::common::{created_response, success_response};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::commerce::{
        AvailableVoucher, CreateVoucherInput, GrantVoucherInput, UpdateVoucherInput,
    },
    ApiResponse, AppState,
};

/// Nested under `/api/vouchers`
pub fn vouchers_routes() -> Router<AppState> {
    Router::new().route("/mine", get(list_my_vouchers))
}

/// Nested under `/api/admin/vouchers`
pub fn admin_vouchers_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list_vouchers).post(admin_create_voucher))
        .route(
            "/:id",
            put(admin_update_voucher).delete(admin_deactivate_voucher),
        )
        .route("/:id/grants", post(admin_grant_voucher))
}

/// Vouchers the caller can still redeem, soonest expiry first
#[utoipa::path(
    get,
    path = "/api/vouchers/mine",
    summary = "List my vouchers",
    responses(
        (status = 200, description = "Redeemable vouchers", body = ApiResponse<Vec<AvailableVoucher>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "vouchers"
)]
pub async fn list_my_vouchers(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<AvailableVoucher>>>, ServiceError> {
    let vouchers = state
        .services
        .vouchers
        .list_available(auth_user.user_id)
        .await?;
    Ok(success_response(vouchers))
}

#[utoipa::path(
    get,
    path = "/api/admin/vouchers",
    summary = "List vouchers",
    responses(
        (status = 200, description = "All vouchers, newest first", body = ApiResponse<Vec<voucher::Model>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn admin_list_vouchers(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<voucher::Model>>>, ServiceError> {
    auth_user.require_admin()?;
    let vouchers = state.services.vouchers.list_all().await?;
    Ok(success_response(vouchers))
}

#[utoipa::path(
    post,
    path = "/api/admin/vouchers",
    summary = "Create voucher",
    request_body = CreateVoucherInput,
    responses(
        (status = 201, description = "Voucher created", body = ApiResponse<voucher::Model>),
        (status = 400, description = "Invalid code, value or validity window", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn admin_create_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(input): Json<CreateVoucherInput>,
) -> Result<(StatusCode, Json<ApiResponse<voucher::Model>>), ServiceError> {
    auth_user.require_admin()?;
    let created = state.services.vouchers.create(input).await?;
    Ok(created_response(created))
}

#[utoipa::path(
    put,
    path = "/api/admin/vouchers/{id}",
    summary = "Update voucher",
    params(("id" = i32, Path, description = "Voucher id")),
    request_body = UpdateVoucherInput,
    responses(
        (status = 200, description = "Voucher updated", body = ApiResponse<voucher::Model>),
        (status = 400, description = "Invalid code, value or validity window", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Voucher not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn admin_update_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<UpdateVoucherInput>,
) -> Result<Json<ApiResponse<voucher::Model>>, ServiceError> {
    auth_user.require_admin()?;
    let updated = state.services.vouchers.update(id, input).await?;
    Ok(success_response(updated))
}

#[utoipa::path(
    delete,
    path = "/api/admin/vouchers/{id}",
    summary = "Deactivate voucher",
    params(("id" = i32, Path, description = "Voucher id")),
    responses(
        (status = 200, description = "Voucher deactivated", body = ApiResponse<voucher::Model>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Voucher not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn admin_deactivate_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<voucher::Model>>, ServiceError> {
    auth_user.require_admin()?;
    let voucher = state.services.vouchers.deactivate(id).await?;
    Ok(success_response(voucher))
}

#[utoipa::path(
    post,
    path = "/api/admin/vouchers/{id}/grants",
    summary = "Grant voucher to a user",
    params(("id" = i32, Path, description = "Voucher id")),
    request_body = GrantVoucherInput,
    responses(
        (status = 201, description = "Grant added to the user's wallet", body = ApiResponse<user_voucher::Model>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Voucher or user not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn admin_grant_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(input): Json<GrantVoucherInput>,
) -> Result<(StatusCode, Json<ApiResponse<user_voucher::Model>>), ServiceError> {
    auth_user.require_admin()?;
    let grant = state.services.vouchers.grant(id, input.user_id).await?;
    Ok(created_response(grant))
}
