use crate::handlers::common::{created_response, success_response};
use crate::{
    auth::{AuthUser, GuestCart, GuestCartToken},
    errors::ServiceError,
    services::commerce::{AddToCartInput, CartOwner, CartView, UpdateCartItemInput},
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;

/// Routes for the signed-in user's cart, nested under `/api/cart`
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:id", put(update_cart_item).delete(remove_cart_item))
        .route("/merge", post(merge_guest_cart))
}

/// Routes for anonymous carts, nested under `/api/guest-cart`
pub fn guest_cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_guest_cart))
        .route("/items", get(get_guest_cart).post(add_to_guest_cart))
        .route(
            "/items/:id",
            put(update_guest_cart_item).delete(remove_guest_cart_item),
        )
}

type CartResult = Result<Json<ApiResponse<CartView>>, ServiceError>;

#[utoipa::path(
    get,
    path = "/api/cart",
    summary = "Get my cart",
    responses(
        (status = 200, description = "Cart with lines", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart(State(state): State<AppState>, auth_user: AuthUser) -> CartResult {
    let cart = state
        .services
        .cart
        .get_cart(CartOwner::User(auth_user.user_id))
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/cart/items",
    summary = "Add item to cart",
    request_body = AddToCartInput,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Variant not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<AddToCartInput>,
) -> CartResult {
    let cart = state
        .services
        .cart
        .add_item(CartOwner::User(auth_user.user_id), payload)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    put,
    path = "/api/cart/items/{id}",
    summary = "Change cart line quantity",
    params(("id" = i32, Path, description = "Cart item id")),
    request_body = UpdateCartItemInput,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateCartItemInput>,
) -> CartResult {
    let cart = state
        .services
        .cart
        .update_item(CartOwner::User(auth_user.user_id), id, payload)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/cart/items/{id}",
    summary = "Remove cart line",
    params(("id" = i32, Path, description = "Cart item id")),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> CartResult {
    let cart = state
        .services
        .cart
        .remove_item(CartOwner::User(auth_user.user_id), id)
        .await?;
    Ok(success_response(cart))
}

/// Move the guest cart named by `X-Guest-Cart` into the caller's cart
#[utoipa::path(
    post,
    path = "/api/cart/merge",
    summary = "Merge guest cart",
    params(("X-Guest-Cart" = String, Header, description = "Guest cart token")),
    responses(
        (status = 200, description = "Merged cart", body = ApiResponse<CartView>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn merge_guest_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
    GuestCart(guest_id): GuestCart,
) -> CartResult {
    let cart = state
        .services
        .cart
        .merge_guest_cart(auth_user.user_id, guest_id)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/guest-cart",
    summary = "Start a guest cart",
    description = "Issue a signed token identifying a new anonymous cart",
    responses(
        (status = 201, description = "Guest cart token", body = ApiResponse<GuestCartToken>),
    ),
    tag = "guest-cart"
)]
pub async fn create_guest_cart(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ApiResponse<GuestCartToken>>), ServiceError> {
    let token = state.guest_tokens.issue(Utc::now())?;
    Ok(created_response(token))
}

#[utoipa::path(
    get,
    path = "/api/guest-cart/items",
    summary = "Get guest cart",
    params(("X-Guest-Cart" = String, Header, description = "Guest cart token")),
    responses(
        (status = 200, description = "Cart with lines", body = ApiResponse<CartView>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
    ),
    tag = "guest-cart"
)]
pub async fn get_guest_cart(
    State(state): State<AppState>,
    GuestCart(guest_id): GuestCart,
) -> CartResult {
    let cart = state.services.cart.get_cart(CartOwner::Guest(guest_id)).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/guest-cart/items",
    summary = "Add item to guest cart",
    params(("X-Guest-Cart" = String, Header, description = "Guest cart token")),
    request_body = AddToCartInput,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
    ),
    tag = "guest-cart"
)]
pub async fn add_to_guest_cart(
    State(state): State<AppState>,
    GuestCart(guest_id): GuestCart,
    Json(payload): Json<AddToCartInput>,
) -> CartResult {
    let cart = state
        .services
        .cart
        .add_item(CartOwner::Guest(guest_id), payload)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    put,
    path = "/api/guest-cart/items/{id}",
    summary = "Change guest cart line quantity",
    params(
        ("id" = i32, Path, description = "Cart item id"),
        ("X-Guest-Cart" = String, Header, description = "Guest cart token"),
    ),
    request_body = UpdateCartItemInput,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse),
    ),
    tag = "guest-cart"
)]
pub async fn update_guest_cart_item(
    State(state): State<AppState>,
    GuestCart(guest_id): GuestCart,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateCartItemInput>,
) -> CartResult {
    let cart = state
        .services
        .cart
        .update_item(CartOwner::Guest(guest_id), id, payload)
        .await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/guest-cart/items/{id}",
    summary = "Remove guest cart line",
    params(
        ("id" = i32, Path, description = "Cart item id"),
        ("X-Guest-Cart" = String, Header, description = "Guest cart token"),
    ),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse),
    ),
    tag = "guest-cart"
)]
pub async fn remove_guest_cart_item(
    State(state): State<AppState>,
    GuestCart(guest_id): GuestCart,
    Path(id): Path<i32>,
) -> CartResult {
    let cart = state
        .services
        .cart
        .remove_item(CartOwner::Guest(guest_id), id)
        .await?;
    Ok(success_response(cart))
}
