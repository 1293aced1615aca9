use axum::{
    extract::{Query, State},
    Json,
};
use std::collections::HashMap;
use tracing::info;

use crate::{
    auth::AuthUser, errors::ServiceError, services::payments::PaymentReturnResponse, AppState,
};

/// Payment provider return
///
/// Receives the provider's query parameters verbatim. Always answers 200;
/// the outcome is carried in `code`.
#[utoipa::path(
    get,
    path = "/api/payment/return",
    summary = "Payment return",
    description = "Verify the provider's signed return and mark the order paid",
    params(
        ("vnp_TxnRef" = String, Query, description = "Order id"),
        ("vnp_Amount" = String, Query, description = "Amount in minor units"),
        ("vnp_ResponseCode" = String, Query, description = "Provider result code"),
        ("vnp_SecureHash" = String, Query, description = "HMAC-SHA512 signature"),
    ),
    responses(
        (status = 200, description = "Outcome code: 00 paid, 97 bad signature, 01 unknown order, 04 amount mismatch, 02 already paid, 03 order cancelled or returned", body = PaymentReturnResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn payment_return(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PaymentReturnResponse>, ServiceError> {
    let outcome = state
        .services
        .payments
        .handle_return(auth_user.user_id, &params)
        .await?;
    if !outcome.is_success() {
        info!(
            user_id = auth_user.user_id,
            code = %outcome.code,
            "Payment return not applied"
        );
    }
    Ok(Json(outcome))
}
