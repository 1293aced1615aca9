mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

struct Placed {
    user_id: i32,
    token: String,
    order_id: i64,
    variant: i32,
}

async fn place_cod_order(app: &TestApp, email: &str, quantity: i32) -> Placed {
    let user_id = app.seed_user(email).await;
    let address_id = app.seed_address(user_id).await.id;
    let token = app.token_for(user_id);
    let variant = app.seed_variant("Pleated Skirt", dec!(22.00), 10).await;
    app.put_in_cart(user_id, variant, quantity).await;

    let res = app
        .post(
            "/api/orders",
            json!({ "shippingAddressId": address_id, "paymentMethod": "COD" }),
            &token,
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

    Placed {
        user_id,
        token,
        order_id: res.body["data"]["order"]["id"].as_i64().unwrap(),
        variant,
    }
}

async fn set_status(app: &TestApp, admin: &str, order_id: i64, status: &str) -> common::TestResponse {
    app.request(
        Method::PUT,
        &format!("/api/admin/orders/{order_id}/status"),
        Some(json!({ "status": status })),
        Some(admin),
        &[],
    )
    .await
}

#[tokio::test]
async fn customer_sees_only_own_orders() {
    let app = TestApp::new().await;
    let placed = place_cod_order(&app, "list@example.com", 1).await;
    let other = app.seed_user("nosy@example.com").await;
    let other_token = app.token_for(other);

    let mine = app.get("/api/orders", &placed.token).await;
    assert_eq!(mine.status, StatusCode::OK);
    assert_eq!(mine.body["data"].as_array().unwrap().len(), 1);
    assert_eq!(mine.body["data"][0]["items"].as_array().unwrap().len(), 1);

    let theirs = app.get("/api/orders", &other_token).await;
    assert_eq!(theirs.body["data"], Value::Array(vec![]));

    let peek = app
        .get(&format!("/api/orders/{}", placed.order_id), &other_token)
        .await;
    assert_eq!(peek.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancelling_pending_order_restocks() {
    let app = TestApp::new().await;
    let placed = place_cod_order(&app, "cancel@example.com", 3).await;
    assert_eq!(app.stock_of(placed.variant).await, 7);

    let res = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", placed.order_id),
            None,
            Some(&placed.token),
            &[],
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["data"]["status"], "CANCELLED");
    assert_eq!(app.stock_of(placed.variant).await, 10);

    let again = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", placed.order_id),
            None,
            Some(&placed.token),
            &[],
        )
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(app.stock_of(placed.variant).await, 10);
}

#[tokio::test]
async fn confirmed_order_cannot_be_cancelled_by_customer() {
    let app = TestApp::new().await;
    let placed = place_cod_order(&app, "late@example.com", 1).await;
    let admin = app.admin_token(placed.user_id);

    let res = set_status(&app, &admin, placed.order_id, "CONFIRMED").await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);

    let res = app
        .request(
            Method::POST,
            &format!("/api/orders/{}/cancel", placed.order_id),
            None,
            Some(&placed.token),
            &[],
        )
        .await;
    assert_eq!(res.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn cod_order_is_paid_on_completion() {
    let app = TestApp::new().await;
    let placed = place_cod_order(&app, "deliver@example.com", 1).await;
    let admin_id = app.seed_user("admin@example.com").await;
    let admin = app.admin_token(admin_id);

    for status in ["CONFIRMED", "SHIPPING", "COMPLETED"] {
        let res = set_status(&app, &admin, placed.order_id, status).await;
        assert_eq!(res.status, StatusCode::OK, "{status}: {}", res.body);
        assert_eq!(res.body["data"]["status"], status);
    }

    let order = app
        .get(&format!("/api/orders/{}", placed.order_id), &placed.token)
        .await;
    assert_eq!(order.body["data"]["payment_status"], "PAID");
    assert!(!order.body["data"]["paid_at"].is_null());
    assert_eq!(app.stock_of(placed.variant).await, 9);
}

#[tokio::test]
async fn returned_order_restocks_and_completed_order_is_final() {
    let app = TestApp::new().await;
    let first = place_cod_order(&app, "return@example.com", 2).await;
    let admin = app.admin_token(first.user_id);

    set_status(&app, &admin, first.order_id, "SHIPPING").await;
    let res = set_status(&app, &admin, first.order_id, "RETURNED").await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(app.stock_of(first.variant).await, 10);

    let res = set_status(&app, &admin, first.order_id, "PENDING").await;
    assert_eq!(res.status, StatusCode::CONFLICT);

    let second = place_cod_order(&app, "skip@example.com", 1).await;
    let res = set_status(&app, &admin, second.order_id, "COMPLETED").await;
    assert_eq!(res.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_endpoints_require_admin_role() {
    let app = TestApp::new().await;
    let placed = place_cod_order(&app, "plain@example.com", 1).await;

    let res = app.get("/api/admin/orders", &placed.token).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = set_status(&app, &placed.token, placed.order_id, "CONFIRMED").await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_lists_and_filters_orders() {
    let app = TestApp::new().await;
    let first = place_cod_order(&app, "one@example.com", 1).await;
    let _second = place_cod_order(&app, "two@example.com", 1).await;
    let admin = app.admin_token(first.user_id);
    set_status(&app, &admin, first.order_id, "CONFIRMED").await;

    let all = app.get("/api/admin/orders?page=1&per_page=10", &admin).await;
    assert_eq!(all.status, StatusCode::OK, "{}", all.body);
    assert_eq!(all.body["data"]["total"], 2);
    assert_eq!(all.body["data"]["orders"].as_array().unwrap().len(), 2);

    let confirmed = app.get("/api/admin/orders?status=CONFIRMED", &admin).await;
    assert_eq!(confirmed.body["data"]["total"], 1);
    assert_eq!(confirmed.body["data"]["orders"][0]["id"], first.order_id);

    let paged = app.get("/api/admin/orders?page=2&per_page=1", &admin).await;
    assert_eq!(paged.body["data"]["orders"].as_array().unwrap().len(), 1);
    assert_eq!(paged.body["data"]["page"], 2);
}
